//! OpenAI-compatible generation backend.
//!
//! All stages talk to the same chat-completions endpoint; each method
//! differs only in prompt and in how the JSON reply is decoded into
//! workflow types. Replies are requested as JSON and defensively
//! unwrapped from markdown fences, since models add them anyway.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::OpenAiConfig;
use crate::errors::{ServiceError, ServiceResult};
use crate::state::{
    AcceptanceCriterion, Epic, Priority, ResearchArtifact, ResearchFindings, SpecDoc, Story,
};
use crate::traits::{EpicBatch, GenerationService};

pub struct OpenAiGenerator {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// One chat-completions round trip; returns the raw assistant
    /// message content.
    async fn chat(&self, model: &str, system: &str, user: &str) -> ServiceResult<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": model,
            "temperature": self.config.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::ApiError(format!(
                "OpenAI API returned {}: {}",
                status, text
            )));
        }

        let payload: Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| {
                ServiceError::InvalidResponse("missing choices[0].message.content".to_string())
            })
    }

    /// Chat round trip that must yield a JSON object.
    async fn chat_json(&self, model: &str, system: &str, user: &str) -> ServiceResult<Value> {
        let content = self.chat(model, system, user).await?;
        parse_json_reply(&content)
    }
}

/// Strip optional ``` fences and parse the remainder as JSON.
fn parse_json_reply(content: &str) -> ServiceResult<Value> {
    let trimmed = content.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.trim_start_matches(['\r', '\n'])
            .strip_suffix("```")
            .unwrap_or(rest)
            .trim()
    } else {
        trimmed
    };
    serde_json::from_str(inner)
        .map_err(|e| ServiceError::InvalidResponse(format!("reply is not valid JSON: {}", e)))
}

fn priority_from_value(value: &Value) -> Priority {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct EpicReply {
    #[serde(default)]
    epics: Vec<EpicItem>,
    #[serde(default)]
    dependency_graph: String,
}

#[derive(Deserialize)]
struct EpicItem {
    title: String,
    #[serde(default)]
    goal: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    priority: Value,
    #[serde(default)]
    dependencies: Vec<usize>,
}

#[derive(Deserialize)]
struct StoryReply {
    #[serde(default)]
    stories: Vec<StoryItem>,
}

#[derive(Deserialize)]
struct StoryItem {
    #[serde(default)]
    epic_index: usize,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    priority: Value,
    #[serde(default)]
    story_points: Option<u32>,
    #[serde(default)]
    edge_cases: Vec<String>,
    #[serde(default)]
    technical_notes: String,
}

#[async_trait]
impl GenerationService for OpenAiGenerator {
    async fn research(
        &self,
        product_request: &str,
        constraints: Option<&str>,
    ) -> ServiceResult<ResearchArtifact> {
        let system = "You are a senior software architect researching a product request. \
                      Reply with a JSON object: {\"key_technologies\": [...], \
                      \"architecture_patterns\": [...], \"security_considerations\": [...], \
                      \"data_model_hints\": [...], \"api_design_hints\": [...], \
                      \"summary\": \"...\"}";
        let user = match constraints {
            Some(c) => format!("Product request:\n{}\n\nConstraints:\n{}", product_request, c),
            None => format!("Product request:\n{}", product_request),
        };

        let reply = self
            .chat_json(&self.config.research_model, system, &user)
            .await?;
        let findings: ResearchFindings = serde_json::from_value(reply)
            .map_err(|e| ServiceError::InvalidResponse(format!("bad research reply: {}", e)))?;

        Ok(ResearchArtifact {
            urls: Vec::new(),
            queries: vec![product_request.to_string()],
            summary: findings.summary.clone(),
            findings,
        })
    }

    async fn generate_epics(
        &self,
        product_request: &str,
        constraints: Option<&str>,
        research: &ResearchArtifact,
        feedback: Option<&str>,
    ) -> ServiceResult<EpicBatch> {
        let system = "You break product requests into engineering epics. Reply with a JSON \
                      object: {\"epics\": [{\"title\", \"goal\", \"scope\", \"priority\", \
                      \"dependencies\": [indices]}], \"dependency_graph\": \"mermaid graph TD \
                      source\"}";
        let mut user = format!(
            "Product request:\n{}\n\nResearch summary:\n{}",
            product_request, research.findings.summary
        );
        if let Some(c) = constraints {
            user.push_str(&format!("\n\nConstraints:\n{}", c));
        }
        if let Some(fb) = feedback {
            user.push_str(&format!(
                "\n\nA previous set of epics was rejected. Address this feedback:\n{}",
                fb
            ));
        }

        let reply = self
            .chat_json(&self.config.generation_model, system, &user)
            .await?;
        let parsed: EpicReply = serde_json::from_value(reply)
            .map_err(|e| ServiceError::InvalidResponse(format!("bad epic reply: {}", e)))?;

        let epics = parsed
            .epics
            .into_iter()
            .enumerate()
            .map(|(i, item)| Epic {
                id: None,
                index: i,
                title: item.title,
                goal: item.goal,
                scope: item.scope,
                priority: priority_from_value(&item.priority),
                dependencies: item.dependencies,
                status: Default::default(),
                feedback: None,
            })
            .collect();

        Ok(EpicBatch {
            epics,
            dependency_graph: parsed.dependency_graph,
        })
    }

    async fn generate_stories(
        &self,
        epics: &[Epic],
        product_request: &str,
        feedback: Option<&str>,
    ) -> ServiceResult<Vec<Story>> {
        let system = "You expand engineering epics into user stories. Reply with a JSON \
                      object: {\"stories\": [{\"epic_index\", \"title\", \"description\", \
                      \"acceptance_criteria\": [{\"given\", \"when\", \"then\"}], \
                      \"priority\", \"story_points\", \"edge_cases\": [...], \
                      \"technical_notes\"}]}";
        let epic_list = epics
            .iter()
            .map(|e| format!("{}. {} - {}", e.index, e.title, e.goal))
            .collect::<Vec<_>>()
            .join("\n");
        let mut user = format!(
            "Product request:\n{}\n\nApproved epics:\n{}",
            product_request, epic_list
        );
        if let Some(fb) = feedback {
            user.push_str(&format!(
                "\n\nA previous set of stories was rejected. Address this feedback:\n{}",
                fb
            ));
        }

        let reply = self
            .chat_json(&self.config.generation_model, system, &user)
            .await?;
        let parsed: StoryReply = serde_json::from_value(reply)
            .map_err(|e| ServiceError::InvalidResponse(format!("bad story reply: {}", e)))?;

        Ok(parsed
            .stories
            .into_iter()
            .map(|item| {
                let epic_title = epics
                    .iter()
                    .find(|e| e.index == item.epic_index)
                    .map(|e| e.title.clone())
                    .unwrap_or_default();
                Story {
                    id: None,
                    epic_index: item.epic_index,
                    epic_title,
                    title: item.title,
                    description: item.description,
                    acceptance_criteria: item.acceptance_criteria,
                    priority: priority_from_value(&item.priority),
                    story_points: item.story_points,
                    edge_cases: item.edge_cases,
                    technical_notes: item.technical_notes,
                    status: Default::default(),
                    feedback: None,
                }
            })
            .collect())
    }

    async fn generate_spec(
        &self,
        story: &Story,
        product_request: &str,
        research_summary: &str,
        feedback: Option<&str>,
    ) -> ServiceResult<SpecDoc> {
        let system = "You write technical specifications for user stories. Reply with a JSON \
                      object: {\"content\": \"full markdown spec\", \"requirements\": {...}, \
                      \"api_design\": {...}, \"data_model\": {...}, \
                      \"security_requirements\": {...}, \"test_plan\": {...}}";
        let criteria = story
            .acceptance_criteria
            .iter()
            .map(|c| format!("Given {} when {} then {}", c.given, c.when, c.then))
            .collect::<Vec<_>>()
            .join("\n");
        let mut user = format!(
            "Product request:\n{}\n\nResearch summary:\n{}\n\nStory: {}\n{}\n\nAcceptance criteria:\n{}",
            product_request, research_summary, story.title, story.description, criteria
        );
        if let Some(fb) = feedback {
            user.push_str(&format!(
                "\n\nA previous spec was rejected. Address this feedback:\n{}",
                fb
            ));
        }

        let reply = self
            .chat_json(&self.config.generation_model, system, &user)
            .await?;
        let content = reply["content"].as_str().unwrap_or_default().to_string();
        if content.is_empty() {
            return Err(ServiceError::InvalidResponse(
                "spec reply missing content".to_string(),
            ));
        }

        Ok(SpecDoc {
            id: None,
            // The spec generation node re-binds this to the story's
            // position in the approved list.
            story_index: 0,
            story_title: story.title.clone(),
            content,
            requirements: reply["requirements"].clone(),
            api_design: reply["api_design"].clone(),
            data_model: reply["data_model"].clone(),
            security_requirements: reply["security_requirements"].clone(),
            test_plan: reply["test_plan"].clone(),
            diagrams: BTreeMap::new(),
            status: Default::default(),
            feedback: None,
        })
    }

    async fn generate_diagrams(&self, spec: &SpecDoc) -> ServiceResult<BTreeMap<String, String>> {
        let system = "You draw Mermaid diagrams for technical specifications. Reply with a \
                      JSON object mapping diagram names to Mermaid source, e.g. \
                      {\"sequence\": \"sequenceDiagram...\", \"entity\": \"erDiagram...\"}";
        let user = format!("Specification:\n{}", spec.content);

        let reply = self
            .chat_json(&self.config.generation_model, system, &user)
            .await?;
        let diagrams: BTreeMap<String, String> = serde_json::from_value(reply)
            .map_err(|e| ServiceError::InvalidResponse(format!("bad diagram reply: {}", e)))?;
        Ok(diagrams)
    }

    async fn generate_code(
        &self,
        specs: &[SpecDoc],
        product_request: &str,
    ) -> ServiceResult<BTreeMap<String, String>> {
        let system = "You generate a complete Python backend from technical specifications. \
                      Reply with a JSON object mapping relative file paths to full file \
                      contents, including tests.";
        let spec_docs = specs
            .iter()
            .map(|s| format!("## {}\n{}", s.story_title, s.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let user = format!(
            "Product request:\n{}\n\nSpecifications:\n{}",
            product_request, spec_docs
        );

        let reply = self
            .chat_json(&self.config.generation_model, system, &user)
            .await?;
        let files: BTreeMap<String, String> = serde_json::from_value(reply)
            .map_err(|e| ServiceError::InvalidResponse(format!("bad code reply: {}", e)))?;
        Ok(files)
    }

    async fn fix_code(
        &self,
        files: &BTreeMap<String, String>,
        errors: &[String],
    ) -> ServiceResult<BTreeMap<String, String>> {
        let system = "You fix validation errors in a Python codebase. Reply with a JSON \
                      object mapping relative file paths to full corrected contents. Include \
                      only the files you changed.";
        let listing = files
            .iter()
            .map(|(path, content)| format!("=== {} ===\n{}", path, content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let user = format!(
            "Validation errors:\n{}\n\nCodebase:\n{}",
            errors.join("\n"),
            listing
        );

        let reply = self
            .chat_json(&self.config.generation_model, system, &user)
            .await?;
        let fixed: BTreeMap<String, String> = serde_json::from_value(reply)
            .map_err(|e| ServiceError::InvalidResponse(format!("bad fix reply: {}", e)))?;
        Ok(fixed)
    }
}
