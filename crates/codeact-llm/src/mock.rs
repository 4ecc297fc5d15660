//! Scripted chat provider for tests. Returns queued responses in order and
//! records every prompt it was asked to complete.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::client::{ChatCompletion, ChatMessage, TokenSink};
use crate::errors::LlmError;
use crate::options::ChatOptions;

#[derive(Default)]
pub struct MockChat {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockChat {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue an error outcome instead of a response.
    pub fn push_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(response.into()));
    }

    /// Prompts seen so far, in call order.
    pub fn seen_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatCompletion for MockChat {
    async fn complete(
        &self,
        prompt: &str,
        _history: &[ChatMessage],
        _options: &ChatOptions,
        on_token: TokenSink<'_>,
        _cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => {
                if let Some(sink) = on_token {
                    sink(&text);
                }
                Ok(text)
            }
            Some(Err(e)) => Err(e),
            // Script exhausted: behave like a provider that went silent.
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_scripted_responses_in_order() {
        let mock = MockChat::new(["first", "second"]);
        let cancel = CancellationToken::new();
        let opts = ChatOptions::default();

        let a = mock.complete("p1", &[], &opts, None, &cancel).await.unwrap();
        let b = mock.complete("p2", &[], &opts, None, &cancel).await.unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "second");
        assert_eq!(mock.seen_prompts(), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn exhausted_script_yields_empty() {
        let mock = MockChat::new(Vec::<String>::new());
        let cancel = CancellationToken::new();
        let out = mock
            .complete("p", &[], &ChatOptions::default(), None, &cancel)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn scripted_error_is_returned() {
        let mock = MockChat::new(Vec::<String>::new());
        mock.push_error(LlmError::RateLimited);
        let cancel = CancellationToken::new();
        let out = mock
            .complete("p", &[], &ChatOptions::default(), None, &cancel)
            .await;
        assert!(matches!(out, Err(LlmError::RateLimited)));
    }

    #[tokio::test]
    async fn token_sink_receives_full_text() {
        let mock = MockChat::new(["streamed"]);
        let cancel = CancellationToken::new();
        let seen = Mutex::new(String::new());
        let sink = |t: &str| seen.lock().unwrap().push_str(t);
        mock.complete("p", &[], &ChatOptions::default(), Some(&sink), &cancel)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), "streamed");
    }
}
