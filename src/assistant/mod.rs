pub mod generator;


use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

pub use self::generator::{Generator, OllamaGenerator};
use crate::database::IndexedDocument;
use crate::retrieval::{RetrievedContext, Retriever};
use crate::{KbError, Result};

const NO_CONTEXT: &str = "No specific context found.";
const EMPTY_ANSWER: &str = "Sorry, I could not generate a response.";
/// Characters of the incoming message body used as the retrieval query for a draft
const DRAFT_QUERY_BODY_CHARS: usize = 500;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>\s*").expect("valid regex"));

static TRAILER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)\s*---\s*(This draft maintains|This reply attempts to|This response aims to|I hope this draft is helpful).*",
    )
    .expect("valid regex")
});

const INTROS: [&str; 9] = [
    "Certainly! Here's a draft of the reply based on the tone and style demonstrated in the examples:",
    "Certainly! Here's a draft of the reply based on the tone and style demonstrated in the provided examples:",
    "Certainly! Here's a draft of the reply:",
    "Certainly! Here's a draft:",
    "Okay, here's a draft:",
    "Here's a draft based on your input:",
    "Here is a draft reply:",
    "Draft reply:",
    "Reply:",
];

/// Answer to a chat question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<IndexedDocument>,
}

/// An incoming message to draft a reply for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRequest {
    /// Mail platform the message arrived on, e.g. "gmail"
    pub platform: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// Earlier messages written by the user, to imitate their style
    #[serde(default)]
    pub style_examples: Vec<String>,
    /// Name of the person the reply is drafted for
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftReply {
    pub draft: String,
    /// Documents whose content informed the draft
    pub sources: Vec<IndexedDocument>,
}

/// Grounds chat answers and reply drafts in the knowledge base
pub struct Assistant {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
}

impl std::fmt::Debug for Assistant {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("retriever", &self.retriever)
            .finish_non_exhaustive()
    }
}

impl Assistant {
    #[inline]
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>) -> Self {
        Self {
            retriever,
            generator,
        }
    }

    /// Answers `question` from the knowledge base.
    ///
    /// `history` is the conversation so far as plain text and may be empty.
    #[inline]
    pub async fn query(&self, question: &str, history: &str) -> Result<ChatAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(KbError::InvalidArgument("question is empty".to_string()));
        }

        info!("Chat query: {}", question);
        let retrieved = self.retriever.retrieve_default(question).await?;
        let prompt = chat_prompt(question, history.trim(), &retrieved.context);

        let raw = self.generator.generate(&prompt).await?;
        let answer = clean_reply(&raw);

        Ok(ChatAnswer {
            answer: if answer.is_empty() {
                EMPTY_ANSWER.to_string()
            } else {
                answer
            },
            sources: retrieved.sources,
        })
    }

    /// Drafts a reply to an incoming message, using company documents when available.
    ///
    /// Unlike [`Assistant::query`], a failed document search does not stop the
    /// draft; it is written without document context.
    #[inline]
    pub async fn draft_reply(&self, request: &DraftRequest) -> Result<DraftReply> {
        let body_excerpt: String = request.body.chars().take(DRAFT_QUERY_BODY_CHARS).collect();
        let query = format!("{} {}", request.subject, body_excerpt);

        let retrieved = match self.retriever.retrieve_default(query.trim()).await {
            Ok(retrieved) => retrieved,
            Err(KbError::KnowledgeBaseNotReady(reason)) => {
                info!("Drafting without document context: {}", reason);
                RetrievedContext::default()
            }
            Err(e) => {
                warn!("Document search failed, drafting without context: {}", e);
                RetrievedContext::default()
            }
        };

        if retrieved.is_empty() {
            debug!("No document context for draft");
        } else {
            info!(
                "Adding {} chars of document context from {} documents",
                retrieved.context.chars().count(),
                retrieved.sources.len()
            );
        }

        let prompt = draft_prompt(request, &retrieved.context);
        let raw = self.generator.generate(&prompt).await?;
        let draft = clean_reply(&raw);
        if draft.is_empty() {
            return Err(KbError::GenerationFailed(
                "model returned an empty draft".to_string(),
            ));
        }

        Ok(DraftReply {
            draft,
            sources: retrieved.sources,
        })
    }
}

/// Builds the prompt for a chat question
#[inline]
pub fn chat_prompt(question: &str, history: &str, context: &str) -> String {
    let mut prompt = String::new();
    if !history.is_empty() {
        let _ = write!(prompt, "Previous conversation:\n{}\n\n", history);
    }
    let context = if context.is_empty() { NO_CONTEXT } else { context };
    let _ = write!(
        prompt,
        "User query: {question}\n\
         You are an AI assistant answering based on the company's documents.\n\
         Provided context:\n\
         --- Context Start ---\n{context}\n--- Context End ---\n\
         Based ONLY on the provided context, the user query and the chat history, answer. \
         If the context lacks the answer, say so.\n\
         Your answer:"
    );
    prompt
}

/// Builds the prompt for drafting a reply. `context` is already within the character budget.
#[inline]
pub fn draft_prompt(request: &DraftRequest, context: &str) -> String {
    let user = if request.user_name.trim().is_empty() {
        "the user"
    } else {
        request.user_name.trim()
    };

    let style = if request.style_examples.is_empty() {
        "Please draft a professional and helpful reply.".to_string()
    } else {
        let mut examples = String::new();
        for (i, example) in request.style_examples.iter().enumerate() {
            let _ = write!(
                examples,
                "Example {} of {}'s writing (from {}):\n{}\n---\n",
                i + 1,
                user,
                request.platform,
                example
            );
        }
        format!(
            "The following excerpts are provided ONLY to demonstrate {user}'s typical writing style.\n\
             DO NOT use the topics or facts from these style examples.\n\
             Your reply's content must be based SOLELY on the new incoming message and the company documents.\n\
             --- Start of Writing Style Examples ---\n\
             {examples}--- End of Writing Style Examples ---\n\
             When drafting the reply, emulate the writing style of {user}."
        )
    };

    let documents = if context.is_empty() {
        String::new()
    } else {
        format!(
            "\n--- Relevant Information from Company Documents ---\n\
             {context}\n\
             --- End of Company Document Information ---\n\n\
             When drafting your reply, use the relevant information from the company documents \
             above to make your response more accurate and informed, if it applies to the incoming message.\n"
        )
    };

    format!(
        "You are an AI assistant helping {user} draft a reply to an important message.\n\
         Your Primary Task: reply to the new incoming message.\n\
         New Incoming Message Details: Platform: {platform}, From: \"{sender}\", Subject: \"{subject}\", Body:\n\
         {body}\n---\n\
         {documents}\n\
         Writing Style Guidance:\n{style}\n\
         Instructions for the Reply Draft:\n\
         1. Address all points of the incoming message, using information from the company documents if relevant.\n\
         2. Write only the reply body.\n\
         3. Do not add a salutation or sign-off.\n\
         4. Do not invent facts.\n\
         5. Match the writing style described above.\n\
         Draft the reply body for the new incoming message now:",
        platform = request.platform,
        sender = request.sender,
        subject = request.subject,
        body = request.body,
    )
}

/// Strips reasoning blocks, boilerplate intros and trailing commentary from a model reply
#[inline]
pub fn clean_reply(raw: &str) -> String {
    let without_thinking = replace_all(&THINK_BLOCK, raw);
    let mut cleaned = without_thinking.trim();

    if let Some(intro) = INTROS.iter().find(|intro| {
        cleaned
            .get(..intro.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(intro))
    }) {
        cleaned = cleaned.get(intro.len()..).unwrap_or_default().trim();
        if let Some(rest) = cleaned.strip_prefix("---") {
            cleaned = rest.trim();
        }
    }

    replace_all(&TRAILER, cleaned).trim().to_string()
}

fn replace_all<'t>(regex: &Regex, text: &'t str) -> Cow<'t, str> {
    regex.try_replacen(text, 0, "").unwrap_or_else(|e| {
        warn!("Reply cleanup pattern failed: {}", e);
        Cow::Borrowed(text)
    })
}
