// 服务模块
// 提供提示词组装、生成会话、回复解析和历史存储

pub mod decode;
pub mod gemini;
pub mod prompt;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use decode::{parse_explanation, parse_quiz};

pub use gemini::{
    display_result,
    GeminiSession,
    GenerationBackend,
    GenerationError,
    GenerationParams,
    HttpBackend,
    Reply,
    SessionConfig,
    TextStream,
    DEFAULT_MODEL,
    NO_RESPONSE_TEXT,
};

pub use prompt::{
    AssembledPrompt,
    PromptAssembler,
    QUIZ_SCHEMA_EXAMPLE,
    REUSE_EXAMPLE_INSTRUCTION,
};

pub use storage::{export_quiz, import_quiz, QuizStore, StoreError};
