/// Default assistant display name.
pub const AI_NAME: &str = "QueryPal";

/// Default owner shown in the footer.
pub const OWNER_NAME: &str = "QueryPal Analytics";

pub const CLEAR_CHAT_TEXT: &str = "New chat";

pub const WELCOME_MESSAGE: &str = "Hi! I'm your analytics assistant. Ask me anything about the store's customers, orders, product categories or revenue, and I'll look it up for you.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplePrompt {
    pub icon: &'static str,
    pub title: &'static str,
    pub prompt: &'static str,
}

/// Suggested prompts offered on a fresh conversation.
pub const SAMPLE_PROMPTS: [SamplePrompt; 4] = [
    SamplePrompt {
        icon: "📊",
        title: "Data Schema",
        prompt: "How does the data schema look like?",
    },
    SamplePrompt {
        icon: "👥",
        title: "Customer insights",
        prompt: "What are the top 10 customers by revenue?",
    },
    SamplePrompt {
        icon: "🛍️",
        title: "Category Insights",
        prompt: "Which category observed the most orders?",
    },
    SamplePrompt {
        icon: "💰",
        title: "Average Order Value",
        prompt: "What is the average order value of the database?",
    },
];

/// Suggested prompts stay visible until the user has said something,
/// i.e. while the transcript holds at most the greeting.
pub fn show_prompts(message_count: usize) -> bool {
    message_count <= 1
}
