//! Turns a free-text architectural requirement into a design proposal.
//!
//! The flow asks the chat model for search keywords, retrieves reference projects with them,
//! asks for design points grounded in those references and finally for a markdown report.
use std::sync::Arc;

use anyhow::{Context as _, Result};
use archscout_core::chunk::SearchHit;
use archscout_core::util::ellipsize;
use archscout_core::{ChatModel, ChatRequest};
use derive_builder::Builder;
use itertools::Itertools as _;
use serde::Serialize;

use crate::prompts;
use crate::retriever::Retriever;

const DEFAULT_REFERENCES: usize = 3;
const DEFAULT_REFERENCE_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub keywords: Vec<String>,
    pub references: Vec<SearchHit>,
    pub design_points: String,
    /// Markdown
    pub report: String,
}

#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ProposalGenerator {
    #[builder(setter(custom))]
    chat: Arc<dyn ChatModel>,
    retriever: Retriever,
    /// Reference projects retrieved per proposal
    #[builder(default = "DEFAULT_REFERENCES")]
    references: usize,
    /// Characters of each reference text shown to the model
    #[builder(default = "DEFAULT_REFERENCE_CHARS")]
    reference_chars: usize,
}

impl ProposalGeneratorBuilder {
    pub fn chat(&mut self, chat: impl ChatModel + 'static) -> &mut Self {
        self.chat = Some(Arc::new(chat));
        self
    }
}

impl ProposalGenerator {
    pub fn builder() -> ProposalGeneratorBuilder {
        ProposalGeneratorBuilder::default()
    }

    /// Runs the whole flow for one requirement.
    ///
    /// A failing reference search is logged and the proposal continues without references.
    ///
    /// # Errors
    ///
    /// Errors if the chat model fails or returns no keywords or no design points.
    #[tracing::instrument(skip_all, name = "query.generate_proposal")]
    pub async fn generate_proposal(&self, requirement: &str) -> Result<Proposal> {
        let keywords = self.extract_keywords(requirement).await?;
        tracing::info!(?keywords, "Extracted keywords");

        let references = match self
            .retriever
            .search(&keywords.join(" "), self.references)
            .await
        {
            Ok(hits) => hits,
            Err(error) => {
                tracing::warn!(error = ?error, "Reference search failed, continuing without");
                Vec::new()
            }
        };
        let formatted = format_references(&references, self.reference_chars);

        let design_points = self
            .ask(
                prompts::design_points(requirement, &formatted),
                Some(prompts::CONSULTANT_ROLE),
                prompts::DESIGN_POINTS_TEMPERATURE,
            )
            .await?;
        anyhow::ensure!(!design_points.trim().is_empty(), "No design points generated");

        let report = self
            .ask(
                prompts::report(requirement, &design_points, &formatted),
                Some(prompts::PLANNER_ROLE),
                prompts::REPORT_TEMPERATURE,
            )
            .await?;
        tracing::info!(chars = report.chars().count(), "Proposal generated");

        Ok(Proposal {
            keywords,
            references,
            design_points,
            report,
        })
    }

    async fn extract_keywords(&self, requirement: &str) -> Result<Vec<String>> {
        let answer = self
            .ask(
                prompts::keywords(requirement),
                None,
                prompts::KEYWORD_TEMPERATURE,
            )
            .await?;

        let keywords = parse_keywords(&answer);
        anyhow::ensure!(!keywords.is_empty(), "No keywords extracted from the requirement");
        Ok(keywords)
    }

    async fn ask(&self, prompt: String, system: Option<&str>, temperature: f32) -> Result<String> {
        let mut request = ChatRequest::builder();
        request.prompt(prompt).temperature(temperature);
        if let Some(system) = system {
            request.system(system);
        }

        self.chat
            .complete(request.build()?)
            .await
            .context("Chat model failed")
    }
}

/// Splits a comma separated answer, accepting full-width and enumeration commas too
fn parse_keywords(answer: &str) -> Vec<String> {
    answer
        .split([',', '，', '、'])
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .map(String::from)
        .unique()
        .collect()
}

fn format_references(hits: &[SearchHit], max_chars: usize) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let text = ellipsize(&hit.text_content, max_chars);
            format!("Reference {} (project {}): {text}", i + 1, hit.project_id)
        })
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use archscout_core::{
        MockChatModel, MockEmbeddingModel, MockEmbeddingStore, ModelError, ProjectId,
    };
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn hit(id: &str, text: &str) -> SearchHit {
        SearchHit {
            project_id: ProjectId::from(id),
            text_content: text.to_string(),
            score: 0.9,
        }
    }

    fn retriever(store: MockEmbeddingStore) -> Retriever {
        let mut model = MockEmbeddingModel::new();
        model.expect_embed().returning(|_| Ok(vec![vec![0.5, 0.5]]));
        Retriever::new(Arc::new(model), Arc::new(store))
    }

    #[test_case("timber, courtyard , hillside", &["timber", "courtyard", "hillside"]; "ascii commas")]
    #[test_case("木结构，庭院、山地", &["木结构", "庭院", "山地"]; "full width commas")]
    #[test_case("timber, timber,, ", &["timber"]; "duplicates and blanks")]
    fn test_parse_keywords(answer: &str, expected: &[&str]) {
        assert_eq!(parse_keywords(answer), expected);
    }

    #[test]
    fn test_references_are_truncated() {
        let formatted = format_references(&[hit("1", &"a".repeat(250)), hit("2", "short")], 200);

        let expected = format!(
            "Reference 1 (project 1): {}...\n\nReference 2 (project 2): short",
            "a".repeat(200)
        );
        assert_eq!(formatted, expected);
    }

    #[test_log::test(tokio::test)]
    async fn test_generate_proposal_flow() {
        let mut store = MockEmbeddingStore::new();
        store
            .expect_search()
            .withf(|_, top_k| *top_k == 3)
            .returning(|_, _| Ok(vec![hit("7", "A tea house with a sunken courtyard.")]));

        let mut chat = MockChatModel::new();
        let mut seq = Sequence::new();
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|request| request.system.is_none() && request.prompt.contains("tea house by a lake"))
            .returning(|_| Ok("tea house, lake, courtyard".into()));
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|request| {
                request.prompt.contains("Reference 1 (project 7)")
                    && request.prompt.ends_with("Design points:")
            })
            .returning(|_| Ok("1. Siting: face the lake".into()));
        chat.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|request| request.prompt.contains("1. Siting: face the lake"))
            .returning(|_| Ok("# Lake tea house".into()));

        let generator = ProposalGenerator::builder()
            .chat(chat)
            .retriever(retriever(store))
            .build()
            .unwrap();

        let proposal = generator
            .generate_proposal("A tea house by a lake")
            .await
            .unwrap();

        assert_eq!(proposal.keywords, vec!["tea house", "lake", "courtyard"]);
        assert_eq!(proposal.references.len(), 1);
        assert_eq!(proposal.design_points, "1. Siting: face the lake");
        assert_eq!(proposal.report, "# Lake tea house");
    }

    #[test_log::test(tokio::test)]
    async fn test_search_failure_continues_without_references() {
        let mut store = MockEmbeddingStore::new();
        store
            .expect_search()
            .returning(|_, _| Err(anyhow::anyhow!("index missing")));

        let mut chat = MockChatModel::new();
        chat.expect_complete().returning(|request| {
            if request.prompt.contains("Keywords:") {
                Ok("museum".into())
            } else if request.prompt.contains("Design points:") {
                assert!(request.prompt.contains("No reference projects found"));
                Ok("1. Light: skylights".into())
            } else {
                Ok("# Museum".into())
            }
        });

        let generator = ProposalGenerator::builder()
            .chat(chat)
            .retriever(retriever(store))
            .build()
            .unwrap();

        let proposal = generator.generate_proposal("A small museum").await.unwrap();
        assert!(proposal.references.is_empty());
        assert_eq!(proposal.report, "# Museum");
    }

    #[test_log::test(tokio::test)]
    async fn test_empty_keywords_fail() {
        let mut chat = MockChatModel::new();
        chat.expect_complete().times(1).returning(|_| Ok(" , ".into()));
        let mut store = MockEmbeddingStore::new();
        store.expect_search().never();

        let generator = ProposalGenerator::builder()
            .chat(chat)
            .retriever(retriever(store))
            .build()
            .unwrap();

        assert!(generator.generate_proposal("?").await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_chat_error_propagates() {
        let mut chat = MockChatModel::new();
        chat.expect_complete()
            .returning(|_| Err(ModelError::permanent("invalid api key")));

        let generator = ProposalGenerator::builder()
            .chat(chat)
            .retriever(retriever(MockEmbeddingStore::new()))
            .build()
            .unwrap();

        assert!(generator.generate_proposal("A library").await.is_err());
    }
}
