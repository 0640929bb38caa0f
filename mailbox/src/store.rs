use accord_store::codec::{decode, encode};
use accord_store::{Column, ColumnDefinition, ColumnKind, KeyedLocks, LedgerTable, Row};
use accord_types::{AssetId, ParticipantId};
use tracing::debug;

use crate::error::MailboxError;
use crate::record::{MailboxEntry, MailboxRecord, Section};

pub const MAILBOX_TABLE: &str = "Mailboxes";

fn schema() -> [ColumnDefinition; 2] {
    [
        ColumnDefinition::key("participant", ColumnKind::String),
        ColumnDefinition::value("record", ColumnKind::Bytes),
    ]
}

/// Mailbox persistence over a [`LedgerTable`].
pub struct MailboxStore<T> {
    table: T,
    locks: KeyedLocks,
}

impl<T: LedgerTable> MailboxStore<T> {
    /// Wrap `table`, declaring the `Mailboxes` table if needed.
    pub fn open(table: T) -> Result<Self, MailboxError> {
        table.create_table(MAILBOX_TABLE, &schema())?;
        Ok(Self {
            table,
            locks: KeyedLocks::new(),
        })
    }

    /// The participant's mailbox, if one has been written.
    pub fn get_mailbox(
        &self,
        participant: &ParticipantId,
    ) -> Result<Option<MailboxRecord>, MailboxError> {
        let Some(row) = self.table.get_row(MAILBOX_TABLE, &key(participant))? else {
            return Ok(None);
        };
        match row.columns.get(1) {
            Some(Column::Bytes(bytes)) => Ok(Some(decode(bytes)?)),
            _ => Err(MailboxError::MalformedRow {
                participant: participant.to_string(),
                reason: "record column missing".to_string(),
            }),
        }
    }

    /// The participant's mailbox, creating and persisting an empty one on
    /// first reference.
    pub fn get_or_create_mailbox(
        &self,
        participant: &ParticipantId,
    ) -> Result<MailboxRecord, MailboxError> {
        if let Some(record) = self.get_mailbox(participant)? {
            return Ok(record);
        }
        self.locks.with_lock(participant.as_str(), || {
            // Another writer may have created it while we waited.
            if let Some(record) = self.get_mailbox(participant)? {
                return Ok(record);
            }
            let record = MailboxRecord::new();
            self.save_unlocked(participant, &record)?;
            debug!(%participant, "created mailbox");
            Ok(record)
        })
    }

    /// Read-modify-write of the whole record under the participant's lock.
    ///
    /// The record is only written back if `f` changed it.
    pub fn update<R>(
        &self,
        participant: &ParticipantId,
        f: impl FnOnce(&mut MailboxRecord) -> R,
    ) -> Result<R, MailboxError> {
        self.locks.with_lock(participant.as_str(), || {
            let existing = self.get_mailbox(participant)?;
            let mut record = existing.clone().unwrap_or_default();
            let out = f(&mut record);
            if existing.as_ref() != Some(&record) {
                self.save_unlocked(participant, &record)?;
            }
            Ok(out)
        })
    }

    /// Keyed overwrite of one entry; re-applying the same entry is a no-op.
    pub fn put_entry(
        &self,
        participant: &ParticipantId,
        entry: MailboxEntry,
    ) -> Result<(), MailboxError> {
        let section = entry.section();
        let id = entry.id().clone();
        let changed = self.update(participant, |record| record.apply(entry))?;
        debug!(%participant, %section, %id, changed, "put mailbox entry");
        Ok(())
    }

    /// Remove `id` from `section`. Returns whether it was present.
    pub fn remove_entry(
        &self,
        participant: &ParticipantId,
        section: Section,
        id: &AssetId,
    ) -> Result<bool, MailboxError> {
        let removed = self.update(participant, |record| record.remove(section, id))?;
        debug!(%participant, %section, %id, removed, "remove mailbox entry");
        Ok(removed)
    }

    /// Persist `record` as the participant's mailbox.
    pub fn save(
        &self,
        participant: &ParticipantId,
        record: &MailboxRecord,
    ) -> Result<(), MailboxError> {
        self.locks
            .with_lock(participant.as_str(), || self.save_unlocked(participant, record))
    }

    /// Insert if absent, replace otherwise. The choice is made from a fresh
    /// existence check, never from an earlier read.
    fn save_unlocked(
        &self,
        participant: &ParticipantId,
        record: &MailboxRecord,
    ) -> Result<(), MailboxError> {
        let row = Row::new(vec![
            Column::String(participant.to_string()),
            Column::Bytes(encode(record)?),
        ]);
        if self.table.row_exists(MAILBOX_TABLE, &key(participant))? {
            self.table.replace_row(MAILBOX_TABLE, &row)?;
        } else {
            self.table.insert_row(MAILBOX_TABLE, &row)?;
        }
        Ok(())
    }
}

fn key(participant: &ParticipantId) -> [Column; 1] {
    [Column::String(participant.to_string())]
}
