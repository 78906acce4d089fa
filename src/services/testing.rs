//! 测试用的脚本化生成后端

use crate::services::gemini::{
    ChunkStream, GenerateContentRequest, GenerateContentResponse, GenerationBackend,
    GenerationError, ModelHandle,
};
use futures::future::BoxFuture;
use futures::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub enum Script {
    Once(Result<GenerateContentResponse, GenerationError>),
    Chunks(Vec<Result<GenerateContentResponse, GenerationError>>),
}

/// 按脚本顺序回复，并记录收到的请求
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<(ModelHandle, GenerateContentRequest)>>>,
}

impl ScriptedBackend {
    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn reply(&self, text: &str) {
        self.push(Script::Once(Ok(GenerateContentResponse::from_text(text))));
    }

    pub fn requests(&self) -> Vec<(ModelHandle, GenerateContentRequest)> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, model: &ModelHandle, request: GenerateContentRequest) -> Script {
        self.requests.lock().unwrap().push((model.clone(), request));
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted response left")
    }
}

impl GenerationBackend for ScriptedBackend {
    fn generate(
        &self,
        model: &ModelHandle,
        request: GenerateContentRequest,
    ) -> BoxFuture<'static, Result<GenerateContentResponse, GenerationError>> {
        let result = match self.next(model, request) {
            Script::Once(result) => result,
            Script::Chunks(_) => panic!("expected a one-shot script"),
        };
        Box::pin(async move { result })
    }

    fn generate_stream(&self, model: &ModelHandle, request: GenerateContentRequest) -> ChunkStream {
        match self.next(model, request) {
            Script::Chunks(chunks) => Box::pin(stream::iter(chunks)),
            Script::Once(_) => panic!("expected a streaming script"),
        }
    }
}
