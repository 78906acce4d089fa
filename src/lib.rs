//! 从课堂笔记生成测验，并在本地保存作答历史

pub mod commands;
pub mod models;
pub mod services;
pub mod utils;

pub use commands::{CommandError, NotesInput, PredefinedQuiz, QuizApp};
pub use models::{Explanation, ExplanationChoice, Question, QuestionOption, Quiz, UserAnswer};
pub use services::{GeminiSession, HttpBackend, PromptAssembler, QuizStore};
