//! Prompts of the proposal flow. Each step answers in the language of the requirement.
use indoc::formatdoc;

pub(crate) const KEYWORD_TEMPERATURE: f32 = 0.3;
pub(crate) const DESIGN_POINTS_TEMPERATURE: f32 = 0.7;
pub(crate) const REPORT_TEMPERATURE: f32 = 0.8;

pub(crate) const CONSULTANT_ROLE: &str =
    "You are a senior architectural design consultant who analyses briefs and gives professional advice.";
pub(crate) const PLANNER_ROLE: &str =
    "You are a senior architectural planner who writes professional design proposals.";

pub(crate) fn keywords(requirement: &str) -> String {
    formatdoc! {"
        Extract 3 to 5 core keywords from the architectural requirement below, to be used for a
        database search.

        Requirements:
        1. Cover building type, site characteristics, scale and programme
        2. Keywords must be concrete and precise
        3. Return only the keywords separated by commas, without explanations

        Requirement: {requirement}

        Keywords:"
    }
}

pub(crate) fn design_points(requirement: &str, references: &str) -> String {
    let references = if references.is_empty() {
        "No reference projects found"
    } else {
        references
    };

    formatdoc! {"
        Based on the information below, give 5 to 8 core design points for the requirement.

        Requirement:
        {requirement}

        Reference projects (retrieved from the database):
        {references}

        Requirements:
        1. One point per line, formatted as \"number. title: short explanation\"
        2. Points must be concrete and actionable
        3. Cover siting, functional layout, environmental response and aesthetics
        4. 30 to 50 words per point

        Design points:"
    }
}

pub(crate) fn report(requirement: &str, design_points: &str, references: &str) -> String {
    let references = if references.is_empty() {
        "(based on professional knowledge)"
    } else {
        references
    };

    formatdoc! {"
        Write a professional architectural design proposal.

        ## Requirement
        {requirement}

        ## Design points
        {design_points}

        ## Reference projects
        {references}

        ## Writing guidelines
        1. **Format**: Markdown with headings and paragraphs
        2. **Structure**: project overview, design concept, design points in detail, reference projects
        3. **Length**: 800 to 1200 words
        4. **Style**: professional and concise

        Proposal:"
    }
}
