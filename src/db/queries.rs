use rusqlite::{params, Connection};

use crate::errors::FetchError;
use crate::models::{Document, Filter};

// ── Documents ──

pub fn put_document(conn: &Connection, collection: &str, doc: &Document) -> Result<(), FetchError> {
    let data = serde_json::to_string(&doc.data)?;
    conn.execute(
        "INSERT INTO documents (collection, id, data, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(collection, id) DO UPDATE SET
           data = excluded.data,
           updated_at = excluded.updated_at",
        params![collection, doc.id, data],
    )?;
    Ok(())
}

pub fn delete_document(conn: &Connection, collection: &str, id: &str) -> Result<bool, FetchError> {
    let count = conn.execute(
        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
        params![collection, id],
    )?;
    Ok(count > 0)
}

pub fn get_document(
    conn: &Connection,
    collection: &str,
    id: &str,
) -> Result<Option<Document>, FetchError> {
    let result = conn.query_row(
        "SELECT id, data FROM documents WHERE collection = ?1 AND id = ?2",
        params![collection, id],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    );

    match result {
        Ok((id, data)) => Ok(Some(Document::new(id, serde_json::from_str(&data)?))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Every document in `collection` matching all `filters`, in id order.
pub fn list_documents(
    conn: &Connection,
    collection: &str,
    filters: &[Filter],
) -> Result<Vec<Document>, FetchError> {
    let mut stmt =
        conn.prepare("SELECT id, data FROM documents WHERE collection = ?1 ORDER BY id ASC")?;

    let rows = stmt.query_map(params![collection], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut docs = vec![];
    for row in rows {
        let (id, data) = row?;
        let doc = Document::new(id, serde_json::from_str(&data)?);
        if filters.iter().all(|f| f.matches(&doc)) {
            docs.push(doc);
        }
    }
    Ok(docs)
}
