//! 解析模型返回的 JSON 文本

use crate::models::{Explanation, Quiz};
use crate::services::gemini::GenerationError;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n(.*?)\s*```\s*$").expect("valid fence pattern")
    })
}

/// 去掉 markdown 代码块围栏
pub fn strip_code_fence(text: &str) -> &str {
    match fence_pattern().captures(text).and_then(|cap| cap.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

/// 截取第一个 `{`/`[` 到最后一个 `}`/`]`，跳过 JSON 前后的说明文字
pub fn extract_json_body(text: &str) -> &str {
    let start = text.find(|c: char| c == '{' || c == '[');
    let end = text.rfind(|c: char| c == '}' || c == ']');
    match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// 去掉字符串之外的 `//` 行注释（示例 JSON 里带有注释，模型有时会照抄）
pub fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, GenerationError> {
    let body = extract_json_body(strip_code_fence(text));
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first) => {
            log::debug!("Retrying decode without line comments: {}", first);
            let cleaned = strip_line_comments(body);
            serde_json::from_str(&cleaned).map_err(|e| GenerationError::Decode(e.to_string()))
        }
    }
}

/// 把模型的完整回复解析为测验
pub fn parse_quiz(text: &str) -> Result<Quiz, GenerationError> {
    let quiz: Quiz = parse_json(text)?;
    log::debug!(
        "Decoded quiz \"{}\" with {} questions",
        quiz.quiz_title,
        quiz.questions.len()
    );
    Ok(quiz)
}

/// 把模型的完整回复解析为题目解析
pub fn parse_explanation(text: &str) -> Result<Explanation, GenerationError> {
    parse_json(text)
}
