//! 中继日志
//!
//! 每笔拿到交易哈希的提交都会记一条；Pending 的条目由后台跟进任务补全最终结果

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use ethers::types::H256;
use serde::Serialize;

use crate::domain::RelayResult;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub label: String,
    pub result: RelayResult,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RelayJournal {
    entries: DashMap<H256, JournalEntry>,
}

impl RelayJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条结果；没有交易哈希的结果不入账
    pub fn record(&self, label: &str, result: &RelayResult) {
        if let Some(tx_hash) = result.tx_hash {
            self.upsert(label, tx_hash, result.clone());
        }
    }

    /// 后台跟进写回最终结果；条目不存在时直接插入
    pub fn resolve(&self, label: &str, tx_hash: H256, result: RelayResult) {
        self.upsert(label, tx_hash, result);
    }

    /// 终态一旦写入就不会被 Pending 覆盖（写入顺序无关）
    fn upsert(&self, label: &str, tx_hash: H256, result: RelayResult) {
        let now = Utc::now();
        match self.entries.entry(tx_hash) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.result.is_terminal() && !result.is_terminal() {
                    return;
                }
                entry.result = result;
                entry.updated_at = now;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(JournalEntry {
                    label: label.to_string(),
                    result,
                    submitted_at: now,
                    updated_at: now,
                });
            }
        }
    }

    pub fn get(&self, tx_hash: &H256) -> Option<JournalEntry> {
        self.entries.get(tx_hash).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
