//! Contact repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide lookup-by-identifier and create/link APIs over `contacts`.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths validate drafts before SQL mutations.
//! - Links always target an existing primary; demotion never leaves a chain.
//! - `created_at` is non-decreasing in `id` order.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::contact::{
    Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone_number,
    linked_id,
    link_precedence,
    created_at,
    updated_at
FROM contacts";

/// Wall clock in epoch milliseconds, evaluated by SQLite.
const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for contact persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ContactValidationError),
    Db(DbError),
    NotFound(ContactId),
    /// Link target is missing, not a primary, or demotion would leave a chain.
    InvalidLink {
        id: ContactId,
        linked_id: ContactId,
        reason: &'static str,
    },
    InvalidData(String),
}

impl RepoError {
    /// Lock contention that a fresh attempt may get past.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_lock_contention())
    }

    /// Connectivity-level failure of the underlying database.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_storage_lost())
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidLink {
                id,
                linked_id,
                reason,
            } => write!(f, "cannot link contact {id} to {linked_id}: {reason}"),
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) => None,
            Self::InvalidLink { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ContactValidationError> for RepoError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for the contact store.
pub trait ContactRepository {
    /// Contacts whose email equals `email` OR whose phone equals `phone_number`.
    ///
    /// Absent arguments match nothing. Ordered by `created_at ASC, id ASC`.
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;
    /// Inserts a draft, assigning id and timestamps.
    fn create_contact(&self, draft: &NewContact) -> RepoResult<Contact>;
    /// Changes the link of one contact.
    fn update_link(&self, id: ContactId, link: LinkPrecedence) -> RepoResult<()>;
    /// Re-points every secondary of `from_primary` to `to_primary`.
    fn relink_secondaries(&self, from_primary: ContactId, to_primary: ContactId)
        -> RepoResult<usize>;
    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>>;
    /// The primary plus all contacts linked to it, oldest first.
    fn find_cluster(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>>;
    fn count_contacts(&self) -> RepoResult<u64>;
}

/// SQLite-backed contact repository.
///
/// Works on a plain connection or on an open transaction.
pub struct SqliteContactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn require_primary(&self, id: ContactId, linked_id: ContactId) -> RepoResult<()> {
        if id == linked_id {
            return Err(ContactValidationError::SelfLink(id).into());
        }
        match self.get_contact(linked_id)? {
            Some(target) if target.is_primary() => Ok(()),
            Some(_) => Err(RepoError::InvalidLink {
                id,
                linked_id,
                reason: "target is not a primary",
            }),
            None => Err(RepoError::InvalidLink {
                id,
                linked_id,
                reason: "target does not exist",
            }),
        }
    }

    fn count_linked_to(&self, id: ContactId) -> RepoResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM contacts WHERE linked_id = ?1;",
            [id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl ContactRepository for SqliteContactRepository<'_> {
    fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(email) = email {
            clauses.push("email = ?");
            bind_values.push(Value::Text(email.to_string()));
        }
        if let Some(phone_number) = phone_number {
            clauses.push("phone_number = ?");
            bind_values.push(Value::Text(phone_number.to_string()));
        }
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{CONTACT_SELECT_SQL} WHERE {} ORDER BY created_at ASC, id ASC",
            clauses.join(" OR ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }

        Ok(contacts)
    }

    fn create_contact(&self, draft: &NewContact) -> RepoResult<Contact> {
        draft.validate()?;
        if let Some(linked_id) = draft.link.linked_id() {
            // New rows have no id yet; 0 never collides with a rowid.
            self.require_primary(0, linked_id)?;
        }

        self.conn.execute(
            &format!(
                "INSERT INTO contacts (
                    email,
                    phone_number,
                    linked_id,
                    link_precedence,
                    created_at,
                    updated_at
                )
                SELECT ?1, ?2, ?3, ?4, stamp, stamp
                FROM (
                    SELECT MAX({NOW_MS_SQL}, COALESCE((SELECT MAX(created_at) FROM contacts), 0))
                        AS stamp
                );"
            ),
            params![
                draft.email.as_deref(),
                draft.phone_number.as_deref(),
                draft.link.linked_id(),
                draft.link.as_str(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        self.get_contact(id)?.ok_or(RepoError::NotFound(id))
    }

    fn update_link(&self, id: ContactId, link: LinkPrecedence) -> RepoResult<()> {
        if let Some(linked_id) = link.linked_id() {
            self.require_primary(id, linked_id)?;
            if self.count_linked_to(id)? > 0 {
                return Err(RepoError::InvalidLink {
                    id,
                    linked_id,
                    reason: "contact still has secondaries; relink them first",
                });
            }
        }

        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    link_precedence = ?1,
                    linked_id = ?2,
                    updated_at = MAX(updated_at, {NOW_MS_SQL})
                 WHERE id = ?3;"
            ),
            params![link.as_str(), link.linked_id(), id],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }

    fn relink_secondaries(
        &self,
        from_primary: ContactId,
        to_primary: ContactId,
    ) -> RepoResult<usize> {
        self.require_primary(from_primary, to_primary)?;

        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    linked_id = ?2,
                    updated_at = MAX(updated_at, {NOW_MS_SQL})
                 WHERE linked_id = ?1
                   AND link_precedence = 'secondary';"
            ),
            params![from_primary, to_primary],
        )?;

        Ok(changed)
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTACT_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contact_row(row)?));
        }

        Ok(None)
    }

    fn find_cluster(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE id = ?1 OR linked_id = ?1
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([primary_id])?;
        let mut contacts = Vec::new();
        while let Some(row) = rows.next()? {
            contacts.push(parse_contact_row(row)?);
        }

        Ok(contacts)
    }

    fn count_contacts(&self) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts;", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let id: ContactId = row.get("id")?;
    let precedence: String = row.get("link_precedence")?;
    let linked_id: Option<ContactId> = row.get("linked_id")?;

    let link = match (precedence.as_str(), linked_id) {
        ("primary", None) => LinkPrecedence::Primary,
        ("secondary", Some(linked_id)) => LinkPrecedence::Secondary { linked_id },
        (other, linked) => {
            return Err(RepoError::InvalidData(format!(
                "contact {id} has link_precedence `{other}` with linked_id {linked:?}"
            )));
        }
    };

    let contact = Contact {
        id,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        link,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    contact.validate()?;
    Ok(contact)
}
