//! 单元测试共用的脚本化传输层

use crate::error::RemoteError;
use crate::transport::Transport;
use crate::types::{BatchResult, TranslateRequest, TranslationResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub(crate) const PRIMARY: &str = "https://primary.example/translate";
pub(crate) const BACKUP_B: &str = "https://b.example/translate";
pub(crate) const BACKUP_C: &str = "https://c.example/translate";

pub(crate) fn valid_result(word: &str) -> TranslationResult {
    TranslationResult {
        translation: format!("{word}-译"),
        definition: format!("definition of {word} for learners"),
        example_source: format!("{word} example"),
        example_target: format!("例句 {word}"),
    }
}

pub(crate) fn echo(request: &TranslateRequest) -> BatchResult {
    request
        .words
        .iter()
        .map(|w| (w.clone(), valid_result(w)))
        .collect()
}

type Scripted = Result<Option<BatchResult>, RemoteError>;

#[derive(Default)]
struct Inner {
    scripts: HashMap<String, VecDeque<Scripted>>,
    calls: Vec<(String, TranslateRequest)>,
}

/// 按端点排队的响应；队列为空时把请求里的单词原样翻译成有效结果
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail(&self, endpoint: &str, error: RemoteError) -> &Self {
        self.push(endpoint, Err(error))
    }

    pub(crate) fn succeed(&self, endpoint: &str) -> &Self {
        self.push(endpoint, Ok(None))
    }

    pub(crate) fn respond(&self, endpoint: &str, results: BatchResult) -> &Self {
        self.push(endpoint, Ok(Some(results)))
    }

    fn push(&self, endpoint: &str, scripted: Scripted) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .entry(endpoint.to_string())
            .or_default()
            .push_back(scripted);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, TranslateRequest)> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(
        &self,
        endpoint: &str,
        request: &TranslateRequest,
    ) -> Result<BatchResult, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push((endpoint.to_string(), request.clone()));
        let next = inner
            .scripts
            .get_mut(endpoint)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(Ok(Some(results))) => Ok(results),
            Some(Ok(None)) | None => Ok(echo(request)),
            Some(Err(e)) => Err(e),
        }
    }
}
