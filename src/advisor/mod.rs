pub mod session;

use crate::error::{Error, Result};
use crate::features::{Indicator, PreferenceVector};
use async_openai::types::{
    ChatCompletionRequestMessageArgs, CreateChatCompletionRequestArgs, Role,
};
use async_openai::Client;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// A text completion backend.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub struct OpenAiModel {
    openai_client: Client,
    model: String,
}

impl OpenAiModel {
    /// Reads `OPENAI_API_KEY` from the environment.
    pub fn new(model: String) -> Self {
        OpenAiModel {
            openai_client: Client::new(),
            model,
        }
    }
}

#[async_trait]
impl TextModel for OpenAiModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .max_tokens(256u16)
            .model(self.model.as_str())
            .temperature(0.0)
            .messages([
                ChatCompletionRequestMessageArgs::default()
                    .role(Role::System)
                    .content(system)
                    .build()?,
                ChatCompletionRequestMessageArgs::default()
                    .role(Role::User)
                    .content(user)
                    .build()?,
            ])
            .build()?;

        let response = self.openai_client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::Llm("completion returned no choices".to_string()))
    }
}

/// Turns a natural-language profile into a preference vector.
#[derive(Clone)]
pub struct Advisor {
    model: Arc<dyn TextModel>,
}

impl Advisor {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Advisor { model }
    }

    /// Returns the parsed vector and the raw reply.
    pub async fn generate(&self, profile: &str) -> Result<(PreferenceVector, String)> {
        let start = Instant::now();
        let text = self.model.complete(&system_prompt(), profile).await?;
        let elapsed = start.elapsed().as_secs_f64();
        info!("llm replied in {}s", elapsed);
        debug!("llm reply: {}", text);

        let vector = parse_preference_vector(&text)?;
        Ok((vector, text))
    }
}

fn system_prompt() -> String {
    let names = Indicator::ALL
        .iter()
        .map(|i| i.name())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You help people choose where to live in Los Angeles. Read the person's description and \
         rate how much each of these aspects of a neighbourhood matters to them: {}. \
         Answer with only a JSON array of {} numbers between 0 and 1, in exactly that order.",
        names,
        Indicator::ALL.len()
    )
}

/// Finds the first JSON array in `text` that is a valid preference vector.
///
/// Prose and code fences around the array are ignored.
pub fn parse_preference_vector(text: &str) -> Result<PreferenceVector> {
    let mut last_error = None;
    for (start, _) in text.match_indices('[') {
        let end = match text[start..].find(']') {
            Some(end) => start + end,
            None => break,
        };
        let values: Vec<f64> = match serde_json::from_str(&text[start..=end]) {
            Ok(values) => values,
            Err(_) => continue,
        };
        match PreferenceVector::from_slice(&values) {
            Ok(vector) => return Ok(vector),
            Err(e) => last_error = Some(e),
        }
    }
    let reason = match last_error {
        Some(e) => format!("{} in {:?}", e, text),
        None => format!("no JSON number array in {:?}", text),
    };
    Err(Error::LlmReply(reason))
}
