//! 提示词组装
//! 把用户笔记、链接和固定的 JSON 示例拼成发送给模型的消息

use crate::models::{Question, UserAnswer};

/// 生成测验时附带的 JSON 示例，每次原样发送
pub const QUIZ_SCHEMA_EXAMPLE: &str = "\n\nUse this JSON schema to generate the questions:\n\n{\n  \"quiz_title\": \"Sample Quiz\",\n  \"questions\": [\n    {\n      \"type\": \"multiple_choice\",\n      \"question\": \"What is the capital of France?\",\n      \"options\": [\n        {\"text\": \"Paris\", \"correct\": true},\n        {\"text\": \"London\",  \"correct\": false},\n        {\"text\": \"Berlin\", \"correct\": false},\n        {\"text\": \"Rome\", \"correct\": false}\n      ]\n    },\n    {\n      \"type\": \"multiple_choice\",\n      \"question\": \"What is the largest planet in our solar system?\",\n      \"options\": [\n        {\"text\": \"Earth\", \"correct\": false},\n        {\"text\": \"Saturn\", \"correct\": false},\n        {\"text\": \"Jupiter\", \"correct\": true},\n        {\"text\": \"Uranus\", \"correct\": false}\n      ]\n    },\n    {\n      \"type\": \"free_answer\",\n      \"question\": \"What is the meaning of life?\",\n      \"answer\": \"\" // user input will be stored here\n    },\n    {\n      \"type\": \"multiple_choice\",\n      \"question\": \"Which of the following is not a primary color?\",\n      \"options\": [\n        {\"text\": \"Red\", \"correct\": false},\n        {\"text\": \"Blue\", \"correct\": false},\n        {\"text\": \"Yellow\", \"correct\": false},\n        {\"text\": \"Green\", \"correct\": true}\n      ]\n    },\n    {\n      \"type\": \"free_answer\",\n      \"question\": \"Describe the concept of artificial intelligence.\",\n      \"answer\": \"\" // user input will be stored here\n    }\n  ]\n}\n";

/// 不生成新测验时（例如请求解析），要求模型沿用之前的示例
pub const REUSE_EXAMPLE_INSTRUCTION: &str = "Please follow the example JSON EXACTLY";

const NOTES_HEADER: &str = "Notes:";
const LINKS_HEADER: &str = "Links:";

/// 组装好的消息，按顺序作为多个文本 part 发送
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    parts: Vec<String>,
}

impl AssembledPrompt {
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// 最后一段：JSON 示例或沿用示例的指令
    pub fn trailing(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or_default()
    }

    /// 用户笔记原文
    pub fn notes(&self) -> &str {
        &self.parts[1]
    }

    pub fn to_text(&self) -> String {
        self.parts.join("\n")
    }
}

/// 提示词组装器
pub struct PromptAssembler;

impl PromptAssembler {
    /// 组装笔记消息。笔记可以为空，不做校验
    pub fn assemble(notes: &str, links: &[String], generate_quiz: bool) -> AssembledPrompt {
        let mut parts = vec![NOTES_HEADER.to_string(), notes.to_string()];

        if !links.is_empty() {
            let mut block = String::from(LINKS_HEADER);
            for link in links {
                block.push('\n');
                block.push_str(link);
            }
            parts.push(block);
        }

        let trailing = if generate_quiz {
            QUIZ_SCHEMA_EXAMPLE
        } else {
            REUSE_EXAMPLE_INSTRUCTION
        };
        parts.push(trailing.to_string());

        AssembledPrompt { parts }
    }

    /// 构建请求单题解析的笔记文本
    pub fn explanation_request(question: &Question, answer: Option<&UserAnswer>) -> String {
        let mut text = format!(
            r#"Explain the answer to this question. Respond with JSON in this shape:
{{"question": "<question text>", "choices": [{{"answerOption": "<option>", "correct": true, "explanation": "<why>"}}]}}
Include one entry in "choices" for every option offered.

Question: {}"#,
            question.prompt()
        );

        for option in question.options() {
            text.push_str(&format!(
                "\n- {} (marked {})",
                option.text,
                if option.is_correct() { "correct" } else { "incorrect" }
            ));
        }

        if let Question::FreeResponse { answer: reference, .. } = question {
            if !reference.is_empty() {
                text.push_str(&format!("\nReference answer: {}", reference));
            }
        }

        if let Some(answer) = answer {
            text.push_str(&format!("\nMy answer: {}", answer.selections.join(", ")));
        }

        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionOption;

    #[test]
    fn test_generate_quiz_ends_with_schema_example() {
        for notes in ["", "Photosynthesis converts light into chemical energy.", "Notes:"] {
            let prompt = PromptAssembler::assemble(notes, &[], true);
            assert_eq!(prompt.trailing(), QUIZ_SCHEMA_EXAMPLE);
            assert!(prompt.to_text().ends_with(QUIZ_SCHEMA_EXAMPLE));
            assert_eq!(prompt.notes(), notes);
        }
    }

    #[test]
    fn test_reuse_instruction_when_not_generating() {
        let prompt = PromptAssembler::assemble("explain question 2", &[], false);

        assert_eq!(prompt.trailing(), REUSE_EXAMPLE_INSTRUCTION);
        assert_eq!(
            prompt.parts(),
            &["Notes:", "explain question 2", REUSE_EXAMPLE_INSTRUCTION]
        );
    }

    #[test]
    fn test_links_block_precedes_trailing() {
        let links = vec![
            "https://en.wikipedia.org/wiki/Cell".to_string(),
            "https://example.com/notes".to_string(),
        ];
        let prompt = PromptAssembler::assemble("cells", &links, true);

        assert_eq!(prompt.parts().len(), 4);
        assert_eq!(
            prompt.parts()[2],
            "Links:\nhttps://en.wikipedia.org/wiki/Cell\nhttps://example.com/notes"
        );
        assert_eq!(prompt.trailing(), QUIZ_SCHEMA_EXAMPLE);
    }

    #[test]
    fn test_explanation_request_lists_options_and_answer() {
        let question = Question::MultipleChoice {
            question: "Largest planet?".to_string(),
            options: vec![
                QuestionOption { text: "Jupiter".to_string(), correct: Some(true) },
                QuestionOption { text: "Earth".to_string(), correct: Some(false) },
            ],
            answer: None,
        };
        let answer = UserAnswer::new(0, vec!["Earth".to_string()]);

        let text = PromptAssembler::explanation_request(&question, Some(&answer));

        assert!(text.contains("Question: Largest planet?"));
        assert!(text.contains("- Jupiter (marked correct)"));
        assert!(text.contains("- Earth (marked incorrect)"));
        assert!(text.ends_with("My answer: Earth"));
    }
}
