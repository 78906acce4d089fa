//! 测验历史存储
//! 所有已完成的测验保存在一个 JSON 文件里，每次追加都整体重写

use crate::models::{AnswerMismatch, Quiz, UserAnswer};
use chrono::Utc;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("history file {} is unreadable ({reason}), moved to {}", path.display(), quarantined.display())]
    Corrupt {
        path: PathBuf,
        quarantined: PathBuf,
        reason: String,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a valid quiz: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
    #[error("failed to encode quizzes: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("answers do not match the quiz: {0}")]
    Answers(#[from] AnswerMismatch),
}

/// 测验历史
///
/// 内存中的列表按完成顺序排列；读者通过 `history()` 或 `snapshot()` 访问，
/// 只有 `append`/`import` 会修改它。
#[derive(Debug)]
pub struct QuizStore {
    path: PathBuf,
    history: Vec<Quiz>,
}

impl QuizStore {
    /// 创建存储，不做任何 IO，需要调用 `load`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            history: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn history(&self) -> &[Quiz] {
        &self.history
    }

    pub fn snapshot(&self) -> Vec<Quiz> {
        self.history.clone()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// 读取历史文件
    ///
    /// 文件不存在时写入空列表；无法解析时把文件改名隔离，内存中为空列表并返回 `Corrupt`。
    pub async fn load(&mut self) -> Result<&[Quiz], StoreError> {
        self.history.clear();

        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!(
                    "No quiz history at {}, creating an empty one",
                    self.path.display()
                );
                self.save().await?;
                return Ok(&self.history);
            }
            Err(source) => {
                log::error!("Failed to load quizzes: {}", source);
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        match serde_json::from_slice::<Vec<Quiz>>(&data) {
            Ok(history) => {
                log::info!(
                    "Loaded {} quizzes from {}",
                    history.len(),
                    self.path.display()
                );
                self.history = history;
                Ok(&self.history)
            }
            Err(e) => {
                let quarantined = self.quarantine().await?;
                log::error!(
                    "Failed to decode quizzes ({}), moved file to {}",
                    e,
                    quarantined.display()
                );
                Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    quarantined,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// 写入作答信息后追加到历史，并整体重写文件
    ///
    /// 写文件失败时内存中的记录不会回滚，下次成功写入时一并落盘。
    pub async fn append(
        &mut self,
        quiz: &Quiz,
        user_answers: Vec<UserAnswer>,
        user_prompt: String,
        user_links: Vec<String>,
        user_photos: Vec<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let completed = quiz.with_attempt(user_answers, user_prompt, user_links, user_photos)?;
        log::debug!("Appending quiz \"{}\"", completed.quiz_title);
        self.history.push(completed);
        self.save().await
    }

    /// 导入单个测验文件并追加到历史
    pub async fn import(&mut self, path: &Path) -> Result<(), StoreError> {
        let quiz = import_quiz(path).await?;
        self.history.push(quiz);
        self.save().await
    }

    async fn save(&self) -> Result<(), StoreError> {
        let data = serde_json::to_vec(&self.history)?;
        write_atomic(&self.path, &data).await.map_err(|source| {
            log::error!("Failed to save quizzes: {}", source);
            StoreError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }

    async fn quarantine(&self) -> Result<PathBuf, StoreError> {
        let quarantined = with_suffix(
            &self.path,
            &format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%3f")),
        );
        fs::rename(&self.path, &quarantined)
            .await
            .map_err(|source| StoreError::Write {
                path: quarantined.clone(),
                source,
            })?;
        Ok(quarantined)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// 先写临时文件再改名，避免写到一半留下残缺的历史
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let tmp = with_suffix(path, ".tmp");
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await
}

/// 导出单个测验
pub async fn export_quiz(quiz: &Quiz, path: &Path) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(quiz)?;
    write_atomic(path, &data)
        .await
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// 读取导出的测验
pub async fn import_quiz(path: &Path) -> Result<Quiz, StoreError> {
    let data = fs::read(path).await.map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|e| StoreError::Invalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Question, QuestionOption};
    use uuid::Uuid;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("recap-store-{}", Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn join(&self, name: &str) -> PathBuf {
            self.0.join(name)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn quiz(title: &str) -> Quiz {
        Quiz::new(
            title,
            vec![
                Question::MultipleChoice {
                    question: format!("{} question", title),
                    options: vec![
                        QuestionOption { text: "A".to_string(), correct: Some(true) },
                        QuestionOption { text: "B".to_string(), correct: Some(false) },
                    ],
                    answer: None,
                },
                Question::FreeResponse {
                    question: "Explain".to_string(),
                    answer: String::new(),
                },
            ],
        )
    }

    fn answers() -> Vec<UserAnswer> {
        vec![
            UserAnswer::new(0, vec!["A".to_string()]),
            UserAnswer::text(1, "because"),
        ]
    }

    async fn append(store: &mut QuizStore, q: &Quiz) {
        store
            .append(q, answers(), format!("{} notes", q.quiz_title), vec![], vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_load_creates_empty_history() {
        let dir = TempDir::new();
        let path = dir.join("quiz.data");

        let mut store = QuizStore::new(&path);
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");

        let mut again = QuizStore::new(&path);
        assert!(again.load().await.unwrap().is_empty());
        assert!(again.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_then_load_round_trips_attempt() {
        let dir = TempDir::new();
        let path = dir.join("quiz.data");
        let mut store = QuizStore::new(&path);
        store.load().await.unwrap();

        append(&mut store, &quiz("First")).await;
        let links = vec!["https://example.com/cells".to_string()];
        let photos = vec![vec![0xFF, 0xD8, 0xFF], vec![1, 2, 3, 4]];
        store
            .append(&quiz("Second"), answers(), "cell notes".to_string(), links.clone(), photos.clone())
            .await
            .unwrap();

        let mut reloaded = QuizStore::new(&path);
        let history = reloaded.load().await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0], store.history()[0]);
        let last = &history[1];
        assert_eq!(last.user_answers, Some(answers()));
        assert_eq!(last.user_prompt.as_deref(), Some("cell notes"));
        assert_eq!(last.user_links, Some(links));
        assert_eq!(last.user_photos, Some(photos));
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let dir = TempDir::new();
        let path = dir.join("quiz.data");
        let mut store = QuizStore::new(&path);
        store.load().await.unwrap();

        append(&mut store, &quiz("Q1")).await;
        append(&mut store, &quiz("Q2")).await;

        let mut reloaded = QuizStore::new(&path);
        let titles: Vec<String> = reloaded
            .load()
            .await
            .unwrap()
            .iter()
            .map(|q| q.quiz_title.clone())
            .collect();
        assert_eq!(titles, vec!["Q1", "Q2"]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_quarantined() {
        let dir = TempDir::new();
        let path = dir.join("quiz.data");
        std::fs::write(&path, b"{not json").unwrap();

        let mut store = QuizStore::new(&path);
        let err = store.load().await.unwrap_err();

        let quarantined = match err {
            StoreError::Corrupt { quarantined, .. } => quarantined,
            other => panic!("unexpected error: {}", other),
        };
        assert!(store.is_empty());
        assert!(!path.exists());
        assert_eq!(std::fs::read(&quarantined).unwrap(), b"{not json");

        append(&mut store, &quiz("Fresh")).await;
        let mut reloaded = QuizStore::new(&path);
        assert_eq!(reloaded.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_answers_are_rejected() {
        let dir = TempDir::new();
        let mut store = QuizStore::new(dir.join("quiz.data"));
        store.load().await.unwrap();

        let result = store
            .append(&quiz("Q"), vec![UserAnswer::text(0, "A")], String::new(), vec![], vec![])
            .await;

        assert!(matches!(result, Err(StoreError::Answers(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory() {
        let dir = TempDir::new();
        let blocker = dir.join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let mut store = QuizStore::new(blocker.join("quiz.data"));
        let result = store
            .append(&quiz("Q"), answers(), String::new(), vec![], vec![])
            .await;

        assert!(matches!(result, Err(StoreError::Write { .. })));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_export_and_import() {
        let dir = TempDir::new();
        let exported = dir.join("shared.recap");
        let mut original = quiz("Shared");
        original.user_prompt = Some("notes".to_string());

        export_quiz(&original, &exported).await.unwrap();
        assert_eq!(import_quiz(&exported).await.unwrap(), original);

        let mut store = QuizStore::new(dir.join("quiz.data"));
        store.load().await.unwrap();
        store.import(&exported).await.unwrap();
        assert_eq!(store.history(), &[original]);

        std::fs::write(&exported, b"[]").unwrap();
        assert!(matches!(
            import_quiz(&exported).await,
            Err(StoreError::Invalid { .. })
        ));
    }
}
