//! 测验流程命令
//! 把会话和历史存储组合成完整的生成、解析、完成流程

use crate::models::{Explanation, Quiz, Score, UserAnswer};
use crate::services::decode::{parse_explanation, parse_quiz};
use crate::services::gemini::{GeminiSession, GenerationBackend, GenerationError};
use crate::services::prompt::PromptAssembler;
use crate::services::storage::{QuizStore, StoreError};
use crate::utils::settings::{AppSettings, SettingsError};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

/// 命令错误
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("question {index} does not exist (quiz has {count})")]
    QuestionOutOfRange { index: usize, count: usize },
    #[error("invalid quiz template: {0}")]
    Template(String),
}

impl CommandError {
    /// 给界面显示的文本
    pub fn display_text(&self) -> String {
        match self {
            CommandError::Generation(e) => e.display_text(),
            other => format!("Error: {}", other),
        }
    }
}

/// 用户提供的素材
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotesInput {
    pub text: String,
    pub links: Vec<String>,
    pub images: Vec<Vec<u8>>,
}

impl NotesInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    fn images(&self) -> Option<&[Vec<u8>]> {
        if self.images.is_empty() {
            None
        } else {
            Some(self.images.as_slice())
        }
    }
}

/// 预设测验模板：固定的笔记和链接，按类别分组展示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredefinedQuiz {
    pub title: String,
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub links: Vec<String>,
    pub category: String,
}

impl PredefinedQuiz {
    /// 从 JSON 文件读取模板列表
    pub async fn load_all(path: &Path) -> Result<Vec<PredefinedQuiz>, CommandError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CommandError::Template(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| CommandError::Template(format!("{}: {}", path.display(), e)))
    }
}

impl From<&PredefinedQuiz> for NotesInput {
    fn from(template: &PredefinedQuiz) -> Self {
        Self {
            text: template.prompt.clone(),
            links: template.links.clone(),
            images: Vec::new(),
        }
    }
}

/// 历史列表项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntryDto {
    pub title: String,
    pub question_count: usize,
    pub score: Option<Score>,
    pub has_photos: bool,
    pub links: Vec<String>,
}

impl From<&Quiz> for HistoryEntryDto {
    fn from(q: &Quiz) -> Self {
        Self {
            title: q.quiz_title.clone(),
            question_count: q.questions.len(),
            score: q.score(),
            has_photos: q.user_photos.as_ref().map_or(false, |p| !p.is_empty()),
            links: q.user_links.clone().unwrap_or_default(),
        }
    }
}

/// 应用状态：一个生成会话加一个历史存储
pub struct QuizApp<B> {
    session: GeminiSession<B>,
    store: Mutex<QuizStore>,
}

impl<B: GenerationBackend> QuizApp<B> {
    pub fn new(session: GeminiSession<B>, store: QuizStore) -> Self {
        Self {
            session,
            store: Mutex::new(store),
        }
    }

    pub fn session(&self) -> &GeminiSession<B> {
        &self.session
    }

    /// 按设置(重新)初始化会话
    pub async fn configure(&self, settings: &AppSettings) -> Result<(), CommandError> {
        let config = settings.session_config()?;
        self.session.initialize(config).await;
        Ok(())
    }

    /// 启动时读取历史，返回条数
    pub async fn load_history(&self) -> Result<usize, CommandError> {
        let mut store = self.store.lock().await;
        Ok(store.load().await?.len())
    }

    /// 一次性生成测验
    pub async fn generate_quiz(&self, notes: &NotesInput) -> Result<Quiz, CommandError> {
        let prompt = PromptAssembler::assemble(&notes.text, &notes.links, true);
        let text = self.session.send_message(&prompt, notes.images()).await?;
        Ok(parse_quiz(&text)?)
    }

    /// 流式生成测验，每收到一段就把累积文本交给回调
    pub async fn generate_quiz_stream<F>(
        &self,
        notes: &NotesInput,
        mut on_progress: F,
    ) -> Result<Quiz, CommandError>
    where
        F: FnMut(&str),
    {
        let prompt = PromptAssembler::assemble(&notes.text, &notes.links, true);
        let mut stream = self
            .session
            .send_message_stream(&prompt, notes.images())
            .await?;

        let mut latest = String::new();
        while let Some(item) = stream.next().await {
            latest = item?;
            on_progress(&latest);
        }

        Ok(parse_quiz(&latest)?)
    }

    /// 请求单题解析
    pub async fn explain_question(
        &self,
        quiz: &Quiz,
        index: usize,
        answer: Option<&UserAnswer>,
    ) -> Result<Explanation, CommandError> {
        let question = quiz
            .questions
            .get(index)
            .ok_or(CommandError::QuestionOutOfRange {
                index,
                count: quiz.questions.len(),
            })?;

        let notes = PromptAssembler::explanation_request(question, answer);
        let prompt = PromptAssembler::assemble(&notes, &[], false);
        let text = self.session.send_message(&prompt, None).await?;
        Ok(parse_explanation(&text)?)
    }

    /// 完成测验后保存作答和原始素材
    pub async fn complete_quiz(
        &self,
        quiz: &Quiz,
        answers: Vec<UserAnswer>,
        notes: &NotesInput,
    ) -> Result<(), CommandError> {
        let mut store = self.store.lock().await;
        store
            .append(
                quiz,
                answers,
                notes.text.clone(),
                notes.links.clone(),
                notes.images.clone(),
            )
            .await?;
        log::info!(
            "Saved quiz \"{}\" ({} in history)",
            quiz.quiz_title,
            store.len()
        );
        Ok(())
    }

    pub async fn import_quiz(&self, path: &Path) -> Result<(), CommandError> {
        self.store.lock().await.import(path).await?;
        Ok(())
    }

    /// 历史快照
    pub async fn history(&self) -> Vec<Quiz> {
        self.store.lock().await.snapshot()
    }

    pub async fn history_entries(&self) -> Vec<HistoryEntryDto> {
        self.store
            .lock()
            .await
            .history()
            .iter()
            .map(HistoryEntryDto::from)
            .collect()
    }
}
