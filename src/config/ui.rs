//! Widget presentation settings: avatars, role names, sidebar text and the
//! quick question buttons.

use crate::error::{KingbotError, Result};
use crate::memory::Role;
use serde::{Deserialize, Serialize};

/// Number of quick question buttons the widget lays out.
pub const QUICK_QUESTION_COUNT: usize = 3;

/// Presentation settings for the chat widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// Page title.
    pub page_title: String,
    /// Avatar image reference per role.
    pub avatars: RoleMap,
    /// Display name per role.
    pub roles: RoleMap,
    pub side: SideSettings,
    pub main: MainSettings,
    /// Input placeholder while idle.
    pub placeholder: String,
    /// Input placeholder while a question is being answered.
    pub busy_placeholder: String,
    /// Label of the free text box in the feedback widget.
    pub feedback_label: String,
    /// Canned questions, one per button.
    pub buttons: Vec<QuickQuestion>,
}

/// A value per chat role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleMap {
    pub user: String,
    pub assistant: String,
}

impl RoleMap {
    /// Look up the value for a role.
    pub fn get(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
        }
    }
}

/// Sidebar text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideSettings {
    pub title: String,
    pub intro: String,
    pub policy_label: String,
    pub policy_link: String,
}

/// Header shown above the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainSettings {
    pub logo: String,
    pub title: String,
}

/// A canned question bound to a button.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuickQuestion {
    /// Button label.
    pub label: String,
    /// Query sent when the button is pressed.
    pub content: String,
    /// Suffix appended to the logged query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chip: Option<String>,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            page_title: "Kingbot - SJSU Library".to_string(),
            avatars: RoleMap {
                user: "🧑".to_string(),
                assistant: "🤖".to_string(),
            },
            roles: RoleMap {
                user: "You".to_string(),
                assistant: "Kingbot".to_string(),
            },
            side: SideSettings {
                title: "### Kingbot".to_string(),
                intro: "Kingbot answers questions about the SJSU King Library using the library's own web pages. Answers can be wrong; check the linked source.".to_string(),
                policy_label: "Privacy policy".to_string(),
                policy_link: "https://library.sjsu.edu/policies".to_string(),
            },
            main: MainSettings {
                logo: "🤖".to_string(),
                title: "Chat with SJSU Library's Kingbot".to_string(),
            },
            placeholder: "Ask me about the SJSU Library!".to_string(),
            busy_placeholder: "Please wait...".to_string(),
            feedback_label: "Optional. Please provide extra information".to_string(),
            buttons: vec![
                QuickQuestion {
                    label: "Library hours".to_string(),
                    content: "What are the library hours?".to_string(),
                    chip: Some("hours".to_string()),
                },
                QuickQuestion {
                    label: "Find articles".to_string(),
                    content: "How do I find articles for my research topic?".to_string(),
                    chip: Some("research".to_string()),
                },
                QuickQuestion {
                    label: "Study rooms".to_string(),
                    content: "How do I reserve a study room?".to_string(),
                    chip: Some("rooms".to_string()),
                },
            ],
        }
    }
}

impl UiSettings {
    /// Ensure the widget can be laid out from these settings.
    pub fn validate(&self) -> Result<()> {
        if self.buttons.len() != QUICK_QUESTION_COUNT {
            return Err(KingbotError::Config(format!(
                "ui.buttons must define exactly {} quick questions, found {}",
                QUICK_QUESTION_COUNT,
                self.buttons.len()
            )));
        }
        for (i, button) in self.buttons.iter().enumerate() {
            if button.label.trim().is_empty() || button.content.trim().is_empty() {
                return Err(KingbotError::Config(format!(
                    "ui.buttons[{}] needs a label and content",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Get the quick question behind a button index.
    pub fn button(&self, index: usize) -> Result<&QuickQuestion> {
        self.buttons.get(index).ok_or_else(|| {
            KingbotError::InvalidInput(format!("No quick question at index {}", index))
        })
    }
}
