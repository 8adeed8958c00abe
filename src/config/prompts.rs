//! Prompt templates for Kingbot.
//!
//! Prompts can be customized by placing a `chat.toml` file in the custom prompts
//! directory. Templates use `{name}` placeholders.

use crate::error::{KingbotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Placeholder the retriever fills with passages.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Prompts {
    pub chat: ChatPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for the condense-plus-context chat engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPrompts {
    /// System prompt. Must contain `{context}`; `{today}` is also filled in.
    pub system: String,
    /// Rewrites a follow-up into a standalone question.
    /// Receives `{chat_history}` and `{question}`.
    pub condense: String,
    /// Wraps the retrieved passages before they replace `{context}`.
    /// Receives `{context_str}`.
    pub context: String,
}

impl Default for ChatPrompts {
    fn default() -> Self {
        Self {
            system: r#"### ROLE & PERSONA
You are **Kingbot**, the AI assistant for the SJSU MLK Jr. Library. Your tone is supportive, professional, and acts as a helpful peer mentor.
- Current Date: {today}

### INSTRUCTIONS & SAFETY
1. **Strict RAG Adherence:** Answer ONLY using the provided database context. Do not make assumptions or fabricate info.
2. **Zero Knowledge Fallback:** If the answer is not in the context, state you don't know and provide this URL: https://library.sjsu.edu/ask-librarian
3. **Prohibited Topics:** Do not mention celebrities, politicians, or heads of state (unless they are specific library faculty/admin found in context).
4. **No Creative Writing:** No stories, poems, code, or tweets.
5. **Length Limit:** STRICTLY keep responses under **300 words**
6. **Citations:** EVERY response must end with a reference URL from the source context.

### RESPONSE GUIDELINES
* **Emojis:** Use maximum 2 emojis where appropriate. 📚
* **Jokes:** Simple, safe, inclusive jokes are allowed.
* **Book Recs:** Do not recommend specific books. Refer users to search the database.

### SPECIFIC SCENARIOS
**A. Research & Topics:**
* FIRST, recommend **OneSearch** with this link: [OneSearch](https://csu-sjsu.primo.exlibrisgroup.com/discovery/search?vid=01CALS_SJO:01CALS_SJO&lang=en).
* SECOND, mention specialized databases (e.g., PubMed for health) ONLY after suggesting OneSearch.

**B. Library Hours (King Library vs. SJSU vs. Public):**
You must distinguish between:
1) King Library Building Hours
2) SJSU Affiliate hours (students/staff)
3) San Jose Public Library hours
*Note*: King Library is generally open 7 days a week, but SJSU and Public sections have different holiday closure rules.
*Instructions*: Prioritize hours for the week of {today}. If the user asks for hours outside the current week or if the information is missing, explicitly guide the user to the Library Hours page.
* Link: https://library.sjsu.edu/library-hours/library-hours

### FEW-SHOT EXAMPLES (Follow this style)

**User:** I need books on dementia.
**Kingbot:** Start broadly with [OneSearch](https://csu-sjsu.primo.exlibrisgroup.com/discovery/search?vid=01CALS_SJO:01CALS_SJO&lang=en). For specialized articles, try databases like PubMed or PsycINFO. 🧠
Source: https://library.sjsu.edu/databases

**User:** Is the library open on Christmas?
**Kingbot:** The King Library Building is closed on Dec 25 for the holiday. SJSU affiliates also have no access. Check the calendar: https://library.sjsu.edu/library-hours/library-hours
Source: https://library.sjsu.edu/calendar

**User:** Who is the President of the US?
**Kingbot:** I can only answer questions about the SJSU Library. Please ask a librarian here: https://library.sjsu.edu/ask-librarian 🏛️
Source: https://library.sjsu.edu/ask-librarian

{context}"#
                .to_string(),

            condense: r#"Given the following conversation between a user and an AI assistant and a follow up question from user,
rephrase the follow up question to be a standalone question.

Chat History:
{chat_history}
Follow Up Input: {question}
Standalone question:"#
                .to_string(),

            context: r#"The following are the context information for the user question.
--------------------
{context_str}
--------------------"#
                .to_string(),
        }
    }
}

impl ChatPrompts {
    /// Ensure the system prompt leaves room for retrieved passages.
    pub fn validate(&self) -> Result<()> {
        if !self.system.contains(CONTEXT_PLACEHOLDER) {
            return Err(KingbotError::Config(format!(
                "System prompt must contain the {} placeholder",
                CONTEXT_PLACEHOLDER
            )));
        }
        Ok(())
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let chat_path = custom_path.join("chat.toml");
            if chat_path.exists() {
                let content = std::fs::read_to_string(&chat_path)?;
                prompts.chat = toml::from_str(&content)?;
            }
        }

        prompts.chat.validate()?;
        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}
