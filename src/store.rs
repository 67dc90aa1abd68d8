//! Persistence for conversations, checkpoints, and the shop catalog
//!
//! The checkpoint store is keyed by conversation id; every state-machine
//! transition boundary appends a full snapshot (state tag + transcript), so a
//! conversation can be suspended indefinitely and resumed, replayed from
//! history, or forked from any snapshot.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),
    #[error("Product not found: {0}")]
    ProductNotFound(String),
    #[error("Slug already exists: {0}")]
    SlugExists(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe store handle
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Conversation Operations ====================

    /// Create a new conversation
    pub fn create_conversation(&self, id: &str, slug: &str) -> StoreResult<Conversation> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE slug = ?1)",
            params![slug],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::SlugExists(slug.to_string()));
        }

        conn.execute(
            "INSERT INTO conversations (id, slug, parent_conversation_id, forked_from_checkpoint, created_at, updated_at)
             VALUES (?1, ?2, NULL, NULL, ?3, ?3)",
            params![id, slug, now.to_rfc3339()],
        )?;

        Ok(Conversation {
            id: id.to_string(),
            slug: Some(slug.to_string()),
            parent_conversation_id: None,
            forked_from_checkpoint: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> StoreResult<Conversation> {
        let conn = self.conn.lock().unwrap();
        Self::query_conversation(&conn, "id", id)
    }

    /// Get conversation by slug
    pub fn get_conversation_by_slug(&self, slug: &str) -> StoreResult<Conversation> {
        let conn = self.conn.lock().unwrap();
        Self::query_conversation(&conn, "slug", slug)
    }

    fn query_conversation(conn: &Connection, column: &str, key: &str) -> StoreResult<Conversation> {
        let sql = format!(
            "SELECT id, slug, parent_conversation_id, forked_from_checkpoint, created_at, updated_at
             FROM conversations WHERE {column} = ?1"
        );
        let mut stmt = conn.prepare(&sql)?;

        stmt.query_row(params![key], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                slug: row.get(1)?,
                parent_conversation_id: row.get(2)?,
                forked_from_checkpoint: row.get(3)?,
                created_at: parse_datetime(&row.get::<_, String>(4)?),
                updated_at: parse_datetime(&row.get::<_, String>(5)?),
            })
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::ConversationNotFound(key.to_string())
            }
            other => StoreError::Sqlite(other),
        })
    }

    /// List conversations, most recently active first
    pub fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, slug, parent_conversation_id, forked_from_checkpoint, created_at, updated_at
             FROM conversations ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                slug: row.get(1)?,
                parent_conversation_id: row.get(2)?,
                forked_from_checkpoint: row.get(3)?,
                created_at: parse_datetime(&row.get::<_, String>(4)?),
                updated_at: parse_datetime(&row.get::<_, String>(5)?),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    // ==================== Checkpoint Operations ====================

    /// Append a snapshot for a conversation. Sequence ids are monotonically
    /// increasing and rows are never rewritten.
    pub fn append_checkpoint(
        &self,
        conversation_id: &str,
        state: &ConvState,
        transcript: &[ChatMessage],
    ) -> StoreResult<Checkpoint> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM checkpoints WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;

        let id = uuid::Uuid::new_v4().to_string();
        let state_str = serde_json::to_string(state)?;
        let transcript_str = serde_json::to_string(transcript)?;

        conn.execute(
            "INSERT INTO checkpoints (id, conversation_id, sequence_id, state, transcript, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                conversation_id,
                sequence_id,
                state_str,
                transcript_str,
                now.to_rfc3339(),
            ],
        )?;

        let updated = conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), conversation_id],
        )?;
        if updated == 0 {
            return Err(StoreError::ConversationNotFound(
                conversation_id.to_string(),
            ));
        }

        Ok(Checkpoint {
            id,
            conversation_id: conversation_id.to_string(),
            sequence_id,
            state: state.clone(),
            transcript: transcript.to_vec(),
            created_at: now,
        })
    }

    /// Get the most recent checkpoint for a conversation
    pub fn latest_checkpoint(&self, conversation_id: &str) -> StoreResult<Option<Checkpoint>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, state, transcript, created_at
             FROM checkpoints WHERE conversation_id = ?1
             ORDER BY sequence_id DESC LIMIT 1",
        )?;

        let mut rows = stmt.query_map(params![conversation_id], checkpoint_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Fetch a specific historical snapshot by its identifier
    pub fn get_checkpoint(&self, checkpoint_id: &str) -> StoreResult<Checkpoint> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, state, transcript, created_at
             FROM checkpoints WHERE id = ?1",
        )?;

        stmt.query_row(params![checkpoint_id], checkpoint_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::CheckpointNotFound(checkpoint_id.to_string())
                }
                other => StoreError::Sqlite(other),
            })
    }

    /// List a conversation's history, most recent first
    pub fn list_checkpoints(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> StoreResult<Vec<Checkpoint>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, state, transcript, created_at
             FROM checkpoints WHERE conversation_id = ?1
             ORDER BY sequence_id DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![conversation_id, limit], checkpoint_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Branch a new conversation from a historical snapshot.
    ///
    /// The snapshot becomes the new conversation's first checkpoint and the
    /// source conversation's cart is copied, so the replayed transcript and
    /// the cart agree in the branch.
    pub fn fork_conversation(
        &self,
        checkpoint_id: &str,
        new_id: &str,
        slug: &str,
    ) -> StoreResult<(Conversation, Checkpoint)> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let source = {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sequence_id, state, transcript, created_at
                 FROM checkpoints WHERE id = ?1",
            )?;
            stmt.query_row(params![checkpoint_id], checkpoint_from_row)
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::CheckpointNotFound(checkpoint_id.to_string())
                    }
                    other => StoreError::Sqlite(other),
                })?
        };

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE slug = ?1)",
            params![slug],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::SlugExists(slug.to_string()));
        }

        conn.execute(
            "INSERT INTO conversations (id, slug, parent_conversation_id, forked_from_checkpoint, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                new_id,
                slug,
                source.conversation_id,
                checkpoint_id,
                now.to_rfc3339()
            ],
        )?;

        let new_checkpoint_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO checkpoints (id, conversation_id, sequence_id, state, transcript, created_at)
             SELECT ?1, ?2, 1, state, transcript, ?3 FROM checkpoints WHERE id = ?4",
            params![new_checkpoint_id, new_id, now.to_rfc3339(), checkpoint_id],
        )?;

        conn.execute(
            "INSERT INTO cart_items (conversation_id, product_id, quantity)
             SELECT ?1, product_id, quantity FROM cart_items WHERE conversation_id = ?2",
            params![new_id, source.conversation_id],
        )?;

        let conversation = Conversation {
            id: new_id.to_string(),
            slug: Some(slug.to_string()),
            parent_conversation_id: Some(source.conversation_id.clone()),
            forked_from_checkpoint: Some(checkpoint_id.to_string()),
            created_at: now,
            updated_at: now,
        };
        let checkpoint = Checkpoint {
            id: new_checkpoint_id,
            conversation_id: new_id.to_string(),
            sequence_id: 1,
            state: source.state,
            transcript: source.transcript,
            created_at: now,
        };
        Ok((conversation, checkpoint))
    }

    // ==================== Catalog Operations ====================

    /// Seed the catalog when empty
    pub fn seed_products(&self, products: &[Product]) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }

        for product in products {
            conn.execute(
                "INSERT INTO products (id, name, description, category, price_cents, stock)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    product.id,
                    product.name,
                    product.description,
                    product.category,
                    product.price_cents,
                    product.stock,
                ],
            )?;
        }
        Ok(products.len())
    }

    /// Search the catalog by free-text preference
    pub fn search_products(&self, preference: &str, limit: u32) -> StoreResult<Vec<Product>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{preference}%");
        let mut stmt = conn.prepare(
            "SELECT id, name, description, category, price_cents, stock FROM products
             WHERE name LIKE ?1 OR description LIKE ?1 OR category LIKE ?1
             ORDER BY name LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![pattern, limit], product_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// List the whole catalog
    pub fn list_products(&self) -> StoreResult<Vec<Product>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, category, price_cents, stock FROM products ORDER BY name",
        )?;
        let rows = stmt.query_map([], product_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Get a product by ID
    pub fn get_product(&self, product_id: &str) -> StoreResult<Product> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, category, price_cents, stock FROM products WHERE id = ?1",
        )?;
        stmt.query_row(params![product_id], product_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::ProductNotFound(product_id.to_string())
                }
                other => StoreError::Sqlite(other),
            })
    }

    // ==================== Cart Operations ====================

    /// List a conversation's cart
    pub fn cart_items(&self, conversation_id: &str) -> StoreResult<Vec<CartItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.product_id, p.name, c.quantity, p.price_cents
             FROM cart_items c JOIN products p ON p.id = c.product_id
             WHERE c.conversation_id = ?1 ORDER BY p.name",
        )?;

        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(CartItem {
                product_id: row.get(0)?,
                product_name: row.get(1)?,
                quantity: row.get(2)?,
                price_cents: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Set a cart line to exactly `quantity` (0 removes the line), reserving
    /// or releasing stock by the difference.
    ///
    /// The existence check and the mutation run under one connection lock, so
    /// a duplicate retry of the same call observes the already-applied state
    /// and changes nothing. Insufficient stock is reported as a value.
    pub fn set_cart_quantity(
        &self,
        conversation_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> StoreResult<CartMutation> {
        let conn = self.conn.lock().unwrap();

        let mut product = {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, category, price_cents, stock FROM products WHERE id = ?1",
            )?;
            stmt.query_row(params![product_id], product_from_row)
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::ProductNotFound(product_id.to_string())
                    }
                    other => StoreError::Sqlite(other),
                })?
        };

        let current: u32 = conn
            .query_row(
                "SELECT quantity FROM cart_items WHERE conversation_id = ?1 AND product_id = ?2",
                params![conversation_id, product_id],
                |row| row.get(0),
            )
            .unwrap_or(0);

        // Stock already held by this line is available to it
        let available = product.stock + current;
        if quantity > available {
            return Ok(CartMutation::InsufficientStock { product, available });
        }

        let delta = i64::from(quantity) - i64::from(current);
        conn.execute(
            "UPDATE products SET stock = stock - ?1 WHERE id = ?2",
            params![delta, product_id],
        )?;

        if quantity == 0 {
            conn.execute(
                "DELETE FROM cart_items WHERE conversation_id = ?1 AND product_id = ?2",
                params![conversation_id, product_id],
            )?;
        } else {
            conn.execute(
                "INSERT INTO cart_items (conversation_id, product_id, quantity) VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id, product_id) DO UPDATE SET quantity = ?3",
                params![conversation_id, product_id, quantity],
            )?;
        }

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        {
            product.stock = (i64::from(product.stock) - delta) as u32;
        }
        Ok(CartMutation::Applied { product, quantity })
    }
}

fn checkpoint_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sequence_id: row.get(2)?,
        state: serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default(),
        transcript: serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn product_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        price_cents: row.get(4)?,
        stock: row.get(5)?,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
