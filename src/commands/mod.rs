// 命令模块
// 提供给界面层调用的测验流程接口

pub mod quiz;

pub use quiz::{CommandError, HistoryEntryDto, NotesInput, PredefinedQuiz, QuizApp};
