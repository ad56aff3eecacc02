use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Text};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{db_err, now_ms, Database};
use crate::error::{Result, WealthWiseError};
use crate::interfaces::providers::Role;

mod schema;
use schema::{conversations, messages};

pub const DEFAULT_TITLE: &str = "New Conversation";
const TITLE_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Tool invocation as recorded on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedToolResult {
    pub tool_use_id: String,
    pub tool: String,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i32,
    pub conversation_id: i32,
    pub role: Role,
    pub content: String,
    pub tool_calls: Option<Vec<RecordedToolCall>>,
    pub tool_results: Option<Vec<RecordedToolResult>>,
    pub created_at: i64,
    /// Suggested next questions, filled in after the reply is stored.
    pub follow_ups: Option<Vec<String>>,
}

/// The newest user message and the assistant reply stored after it.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub user_message: String,
    pub reply: String,
    pub reply_id: i32,
}

#[derive(Queryable)]
struct ConversationRow {
    id: i32,
    user_id: i32,
    title: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Queryable)]
struct MessageRow {
    id: i32,
    conversation_id: i32,
    role: String,
    content: String,
    tool_calls: Option<String>,
    tool_results: Option<String>,
    created_at: i64,
    follow_ups: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = conversations)]
struct NewConversation<'a> {
    user_id: i32,
    title: &'a str,
    created_at: i64,
    updated_at: i64,
}

#[derive(QueryableByName)]
struct InsertedMessage {
    #[diesel(sql_type = Integer)]
    id: i32,
    #[diesel(sql_type = BigInt)]
    created_at: i64,
}

/// Truncates to the stored title length on a char boundary.
pub fn title_from(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    trimmed.chars().take(TITLE_MAX_CHARS).collect()
}

pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, user_id: i32, title: &str) -> Result<Conversation> {
        let now = now_ms();
        let new = NewConversation {
            user_id,
            title,
            created_at: now,
            updated_at: now,
        };
        let mut conn = self.db.conn().await?;
        let row: ConversationRow = diesel::insert_into(conversations::table)
            .values(&new)
            .returning(conversations::all_columns)
            .get_result(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(map_conversation(row))
    }

    /// Looks up a conversation owned by `user_id`; other users' conversations are invisible.
    pub async fn get(&self, user_id: i32, conversation_id: i32) -> Result<Option<Conversation>> {
        let mut conn = self.db.conn().await?;
        let row: Option<ConversationRow> = conversations::table
            .filter(conversations::id.eq(conversation_id))
            .filter(conversations::user_id.eq(user_id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        Ok(row.map(map_conversation))
    }

    pub async fn list(&self, user_id: i32, limit: usize) -> Result<Vec<Conversation>> {
        let mut conn = self.db.conn().await?;
        let rows: Vec<ConversationRow> = conversations::table
            .filter(conversations::user_id.eq(user_id))
            .order((conversations::updated_at.desc(), conversations::id.desc()))
            .limit(limit as i64)
            .load(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(map_conversation).collect())
    }

    pub async fn set_title(&self, conversation_id: i32, title: &str) -> Result<()> {
        let mut conn = self.db.conn().await?;
        diesel::update(conversations::table.filter(conversations::id.eq(conversation_id)))
            .set(conversations::title.eq(title))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn delete(&self, user_id: i32, conversation_id: i32) -> Result<()> {
        let mut conn = self.db.conn().await?;
        let deleted = diesel::delete(
            conversations::table
                .filter(conversations::id.eq(conversation_id))
                .filter(conversations::user_id.eq(user_id)),
        )
        .execute(&mut conn)
        .await
        .map_err(db_err)?;
        if deleted == 0 {
            return Err(WealthWiseError::NotFound("conversation".to_string()));
        }
        Ok(())
    }

    /// Appends a message and bumps the parent's `updated_at`.
    ///
    /// `created_at` is forced strictly past the newest message in the conversation so
    /// timestamp order and insertion order never disagree, even within one millisecond.
    pub async fn append(
        &self,
        conversation_id: i32,
        role: Role,
        content: &str,
        tool_calls: &[RecordedToolCall],
        tool_results: &[RecordedToolResult],
    ) -> Result<Message> {
        let calls_json = encode_optional(tool_calls)?;
        let results_json = encode_optional(tool_results)?;
        let now = now_ms();

        let mut conn = self.db.conn().await?;
        let inserted: InsertedMessage = diesel::sql_query(
            "INSERT INTO messages (conversation_id, role, content, tool_calls, tool_results, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5,
                    MAX(?6, COALESCE((SELECT MAX(created_at) + 1 FROM messages WHERE conversation_id = ?1), ?6))
             RETURNING id, created_at",
        )
        .bind::<Integer, _>(conversation_id)
        .bind::<Text, _>(role.as_str())
        .bind::<Text, _>(content)
        .bind::<Nullable<Text>, _>(calls_json)
        .bind::<Nullable<Text>, _>(results_json)
        .bind::<BigInt, _>(now)
        .get_result(&mut conn)
        .await
        .map_err(db_err)?;

        diesel::sql_query(
            "UPDATE conversations SET updated_at = MAX(?1, updated_at + 1, ?2) WHERE id = ?3",
        )
        .bind::<BigInt, _>(now)
        .bind::<BigInt, _>(inserted.created_at)
        .bind::<Integer, _>(conversation_id)
        .execute(&mut conn)
        .await
        .map_err(db_err)?;

        Ok(Message {
            id: inserted.id,
            conversation_id,
            role,
            content: content.to_string(),
            tool_calls: non_empty(tool_calls),
            tool_results: non_empty(tool_results),
            created_at: inserted.created_at,
            follow_ups: None,
        })
    }

    /// Full transcript in creation order.
    pub async fn messages(&self, conversation_id: i32) -> Result<Vec<Message>> {
        let mut conn = self.db.conn().await?;
        let rows: Vec<MessageRow> = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .order((messages::created_at.asc(), messages::id.asc()))
            .load(&mut conn)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(map_message).collect()
    }

    pub async fn count_messages(&self, conversation_id: i32, role: Option<Role>) -> Result<i64> {
        let mut conn = self.db.conn().await?;
        let mut query = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .into_boxed();
        if let Some(role) = role {
            query = query.filter(messages::role.eq(role.as_str()));
        }
        query
            .count()
            .get_result(&mut conn)
            .await
            .map_err(db_err)
    }

    pub async fn set_follow_ups(&self, message_id: i32, follow_ups: &[String]) -> Result<()> {
        let encoded = encode_optional(follow_ups)?;
        let mut conn = self.db.conn().await?;
        diesel::update(messages::table.filter(messages::id.eq(message_id)))
            .set(messages::follow_ups.eq(encoded))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Latest user message and the assistant reply that followed it, if both exist.
    pub async fn last_exchange(&self, conversation_id: i32) -> Result<Option<Exchange>> {
        let mut conn = self.db.conn().await?;
        let rows: Vec<MessageRow> = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .order((messages::created_at.desc(), messages::id.desc()))
            .limit(2)
            .load(&mut conn)
            .await
            .map_err(db_err)?;
        let mut rows = rows.into_iter();
        match (rows.next(), rows.next()) {
            (Some(assistant), Some(user)) if assistant.role == "assistant" && user.role == "user" => {
                Ok(Some(Exchange {
                    user_message: user.content,
                    reply: assistant.content,
                    reply_id: assistant.id,
                }))
            }
            _ => Ok(None),
        }
    }
}

fn encode_optional<T: Serialize>(items: &[T]) -> Result<Option<String>> {
    if items.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(items)
        .map(Some)
        .map_err(|e| WealthWiseError::Serialization(e.to_string()))
}

fn decode_optional<T: for<'de> Deserialize<'de>>(raw: Option<String>) -> Result<Option<Vec<T>>> {
    match raw {
        Some(text) if !text.trim().is_empty() => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| WealthWiseError::Serialization(e.to_string())),
        _ => Ok(None),
    }
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items.to_vec())
    }
}

fn map_conversation(row: ConversationRow) -> Conversation {
    Conversation {
        id: row.id,
        user_id: row.user_id,
        title: row.title,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn map_message(row: MessageRow) -> Result<Message> {
    Ok(Message {
        id: row.id,
        conversation_id: row.conversation_id,
        role: Role::parse(&row.role)?,
        content: row.content,
        tool_calls: decode_optional(row.tool_calls)?,
        tool_results: decode_optional(row.tool_results)?,
        created_at: row.created_at,
        follow_ups: decode_optional(row.follow_ups)?,
    })
}
