//! 测验数据模型
//! 同时用作模型返回的 JSON 格式和本地历史文件格式

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

mod photos;

/// 一次生成的测验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub quiz_title: String,
    pub questions: Vec<Question>,
    #[serde(rename = "userAnswers", default, skip_serializing_if = "Option::is_none")]
    pub user_answers: Option<Vec<UserAnswer>>,
    #[serde(rename = "userPrompt", default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    #[serde(rename = "userLinks", default, skip_serializing_if = "Option::is_none")]
    pub user_links: Option<Vec<String>>,
    #[serde(
        rename = "userPhotos",
        default,
        skip_serializing_if = "Option::is_none",
        with = "photos"
    )]
    pub user_photos: Option<Vec<Vec<u8>>>,
}

/// 题目：选择题或自由作答题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Question {
    #[serde(rename = "multiple_choice")]
    MultipleChoice {
        question: String,
        #[serde(default)]
        options: Vec<QuestionOption>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
    },
    #[serde(rename = "free_answer")]
    FreeResponse {
        question: String,
        #[serde(default)]
        answer: String,
    },
}

/// 选择题选项，可以有多个正确选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
}

/// 用户对某一题的作答
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub question_index: usize,
    pub selections: Vec<String>,
}

/// 题目解析：每个选项为什么对或错
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub question: String,
    pub choices: Vec<ExplanationChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationChoice {
    pub answer_option: String,
    pub correct: bool,
    pub explanation: String,
}

/// 作答数量与题目数量不一致
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnswerMismatch {
    #[error("expected {expected} answers, got {actual}")]
    Count { expected: usize, actual: usize },
    #[error("answer at position {position} is keyed to question {index}")]
    Index { position: usize, index: usize },
}

/// 得分统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub correct: usize,
    pub gradable: usize,
    pub total: usize,
}

impl UserAnswer {
    pub fn new(question_index: usize, selections: Vec<String>) -> Self {
        Self {
            question_index,
            selections,
        }
    }

    /// 自由作答题只有一条文本
    pub fn text(question_index: usize, text: impl Into<String>) -> Self {
        Self::new(question_index, vec![text.into()])
    }
}

impl Question {
    pub fn prompt(&self) -> &str {
        match self {
            Question::MultipleChoice { question, .. } | Question::FreeResponse { question, .. } => {
                question
            }
        }
    }

    pub fn options(&self) -> &[QuestionOption] {
        match self {
            Question::MultipleChoice { options, .. } => options,
            Question::FreeResponse { .. } => &[],
        }
    }

    /// 被标记为正确的选项文本
    pub fn correct_options(&self) -> Vec<&str> {
        self.options()
            .iter()
            .filter(|o| o.is_correct())
            .map(|o| o.text.as_str())
            .collect()
    }

    /// 判分。选择题要求所选集合与正确集合完全一致；自由作答题无法本地判分
    pub fn grade(&self, answer: &UserAnswer) -> Option<bool> {
        match self {
            Question::MultipleChoice { .. } => {
                let expected: BTreeSet<&str> = self.correct_options().into_iter().collect();
                let selected: BTreeSet<&str> =
                    answer.selections.iter().map(String::as_str).collect();
                Some(expected == selected)
            }
            Question::FreeResponse { .. } => None,
        }
    }
}

impl QuestionOption {
    pub fn is_correct(&self) -> bool {
        self.correct.unwrap_or(false)
    }
}

impl Quiz {
    pub fn new(title: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            quiz_title: title.into(),
            questions,
            user_answers: None,
            user_prompt: None,
            user_links: None,
            user_photos: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.user_answers.is_some()
    }

    /// 检查作答是否与题目一一对应
    pub fn validate_answers(&self, answers: &[UserAnswer]) -> Result<(), AnswerMismatch> {
        if answers.len() != self.questions.len() {
            return Err(AnswerMismatch::Count {
                expected: self.questions.len(),
                actual: answers.len(),
            });
        }
        for (position, answer) in answers.iter().enumerate() {
            if answer.question_index != position {
                return Err(AnswerMismatch::Index {
                    position,
                    index: answer.question_index,
                });
            }
        }
        Ok(())
    }

    /// 复制一份并写入用户作答和原始素材
    pub fn with_attempt(
        &self,
        user_answers: Vec<UserAnswer>,
        user_prompt: String,
        user_links: Vec<String>,
        user_photos: Vec<Vec<u8>>,
    ) -> Result<Quiz, AnswerMismatch> {
        self.validate_answers(&user_answers)?;
        let mut quiz = self.clone();
        quiz.user_answers = Some(user_answers);
        quiz.user_prompt = Some(user_prompt);
        quiz.user_links = Some(user_links);
        quiz.user_photos = Some(user_photos);
        Ok(quiz)
    }

    pub fn score(&self) -> Option<Score> {
        let answers = self.user_answers.as_ref()?;
        let mut score = Score {
            correct: 0,
            gradable: 0,
            total: self.questions.len(),
        };
        for (question, answer) in self.questions.iter().zip(answers) {
            if let Some(ok) = question.grade(answer) {
                score.gradable += 1;
                if ok {
                    score.correct += 1;
                }
            }
        }
        Some(score)
    }
}
