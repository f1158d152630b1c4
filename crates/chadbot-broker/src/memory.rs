//! In-memory backing stores.
//!
//! Reference implementations of the [`TableStore`] and [`ChatStore`] seams,
//! used by the test suite and by deployments that do not need durability.
//! The production persistence layer lives outside this workspace and
//! implements the same traits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use chadbot_core::chat::{ChatRecord, MessageRecord};
use chadbot_core::error::{BrokerError, BrokerResult, StorageError, StorageResult};
use chadbot_core::event::now_ms;
use chadbot_core::protocol::{ColumnSpec, Row};

use crate::chat::{ChatStore, NewMessage};
use crate::storage::TableStore;

// =============================================================================
// MemoryTableStore
// =============================================================================

struct TableData {
    columns: Vec<ColumnSpec>,
    rows: Vec<Row>,
}

/// In-memory [`TableStore`].
///
/// The `where_clause` grammar supported here is the conjunction subset
/// `field op ?` joined by `AND`, with `op` one of `=`, `!=`, `<>`, `<`,
/// `>`, `<=`, `>=`. Values that parse as numbers on both sides compare
/// numerically, otherwise as strings. Missing columns compare as the empty
/// string.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, TableData>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn check_clause(row: &Row, clause: &str, args: &[String]) -> StorageResult<bool> {
    let clause = clause.trim();
    if clause.is_empty() {
        return Ok(true);
    }

    let mut arg_iter = args.iter();
    for condition in clause.split(" AND ") {
        let parts: Vec<&str> = condition.split_whitespace().collect();
        let [field, op, placeholder] = parts[..] else {
            return Err(StorageError::BadClause(format!(
                "expected 'field op ?', got '{condition}'"
            )));
        };
        if placeholder != "?" {
            return Err(StorageError::BadClause(format!(
                "only positional '?' values are supported, got '{placeholder}'"
            )));
        }
        let arg = arg_iter
            .next()
            .ok_or_else(|| StorageError::BadClause("not enough arguments".into()))?;

        let actual = row.get(field).map(String::as_str).unwrap_or("");
        let ordering = match (actual.parse::<f64>(), arg.parse::<f64>()) {
            (Ok(a), Ok(b)) => a.partial_cmp(&b),
            _ => Some(actual.cmp(arg.as_str())),
        };
        let Some(ordering) = ordering else {
            return Ok(false);
        };

        let matched = match op {
            "=" => ordering.is_eq(),
            "!=" | "<>" => !ordering.is_eq(),
            "<" => ordering.is_lt(),
            ">" => ordering.is_gt(),
            "<=" => ordering.is_le(),
            ">=" => ordering.is_ge(),
            other => {
                return Err(StorageError::BadClause(format!(
                    "unsupported operator '{other}'"
                )));
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn create_table(&self, table: &str, columns: &[ColumnSpec]) -> StorageResult<()> {
        self.tables
            .write()
            .entry(table.to_string())
            .or_insert_with(|| TableData {
                columns: columns.to_vec(),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> StorageResult<()> {
        self.tables.write().remove(table);
        Ok(())
    }

    async fn insert(&self, table: &str, values: &BTreeMap<String, String>) -> StorageResult<u64> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        data.rows.push(values.clone());
        Ok(1)
    }

    async fn update(
        &self,
        table: &str,
        values: &BTreeMap<String, String>,
        where_clause: &str,
        args: &[String],
    ) -> StorageResult<u64> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let mut affected = 0;
        for row in data.rows.iter_mut() {
            if check_clause(row, where_clause, args)? {
                for (k, v) in values {
                    row.insert(k.clone(), v.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, where_clause: &str, args: &[String]) -> StorageResult<u64> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let before = data.rows.len();
        let mut error = None;
        data.rows.retain(|row| match check_clause(row, where_clause, args) {
            Ok(matched) => !matched,
            Err(e) => {
                error.get_or_insert(e);
                true
            }
        });
        if let Some(e) = error {
            return Err(e);
        }
        Ok((before - data.rows.len()) as u64)
    }

    async fn query(
        &self,
        table: &str,
        where_clause: &str,
        args: &[String],
        limit: Option<u32>,
    ) -> StorageResult<Vec<Row>> {
        let tables = self.tables.read();
        let data = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let mut rows = Vec::new();
        for row in &data.rows {
            if check_clause(row, where_clause, args)? {
                // Absent columns surface as empty strings, like SQL NULLs.
                let mut out = row.clone();
                for col in &data.columns {
                    out.entry(col.name.clone()).or_default();
                }
                rows.push(out);
                if let Some(limit) = limit
                    && rows.len() as u32 >= limit
                {
                    break;
                }
            }
        }
        Ok(rows)
    }
}

// =============================================================================
// MemoryChatStore
// =============================================================================

#[derive(Default)]
struct ChatState {
    chats: Vec<ChatRecord>,
    messages: Vec<MessageRecord>,
    next_chat: u64,
    next_message: u64,
}

/// In-memory [`ChatStore`].
#[derive(Default)]
pub struct MemoryChatStore {
    state: RwLock<ChatState>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get_or_create_chat(
        &self,
        platform: &str,
        linked_id: &str,
        name: &str,
    ) -> BrokerResult<(ChatRecord, bool)> {
        let mut state = self.state.write();
        if let Some(chat) = state
            .chats
            .iter()
            .find(|c| c.platform == platform && c.linked_id == linked_id)
        {
            return Ok((chat.clone(), false));
        }
        state.next_chat += 1;
        let chat = ChatRecord {
            id: format!("chat-{}", state.next_chat),
            platform: platform.to_string(),
            linked_id: linked_id.to_string(),
            name: name.to_string(),
            created_at_ms: now_ms(),
        };
        state.chats.push(chat.clone());
        Ok((chat, true))
    }

    async fn add_message(&self, message: NewMessage) -> BrokerResult<MessageRecord> {
        let mut state = self.state.write();
        if !state.chats.iter().any(|c| c.id == message.chat_id) {
            return Err(BrokerError::ChatStore(format!(
                "chat '{}' not found",
                message.chat_id
            )));
        }
        state.next_message += 1;
        let record = MessageRecord {
            id: format!("msg-{}", state.next_message),
            chat_id: message.chat_id,
            role: message.role,
            content: message.content,
            attachments: message.attachments,
            display_only: message.display_only,
            created_at_ms: now_ms(),
        };
        state.messages.push(record.clone());
        Ok(record)
    }

    async fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        offset: u32,
    ) -> BrokerResult<Vec<MessageRecord>> {
        let state = self.state.read();
        let iter = state
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .skip(offset as usize);
        let messages = if limit == 0 {
            iter.cloned().collect()
        } else {
            iter.take(limit as usize).cloned().collect()
        };
        Ok(messages)
    }
}
