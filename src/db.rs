// src/db.rs - Database setup and migrations
use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Products: aggregate on-hand quantity is the authoritative total
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            sku TEXT NOT NULL UNIQUE CHECK(length(sku) >= 1 AND length(sku) <= 64),
            name TEXT NOT NULL CHECK(length(name) >= 1 AND length(name) <= 255),
            quantity INTEGER NOT NULL DEFAULT 0 CHECK(quantity >= 0),
            unit_price REAL NOT NULL DEFAULT 0 CHECK(unit_price >= 0),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Per-location stock rows, created on first receipt into a location
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS location_stock (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL,
            warehouse TEXT NOT NULL CHECK(length(warehouse) >= 1 AND length(warehouse) <= 64),
            zone TEXT NOT NULL CHECK(length(zone) >= 1 AND length(zone) <= 64),
            quantity INTEGER NOT NULL DEFAULT 0 CHECK(quantity >= 0),
            reserved_quantity INTEGER NOT NULL DEFAULT 0 CHECK(reserved_quantity >= 0),
            bin TEXT CHECK(bin IS NULL OR length(bin) <= 32),
            last_audited_at DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (product_id) REFERENCES products (id) ON DELETE CASCADE,
            UNIQUE(product_id, warehouse, zone)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Batches: finer-grained traceability view over a location's stock
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL,
            warehouse TEXT NOT NULL,
            zone TEXT NOT NULL,
            batch_number TEXT NOT NULL CHECK(length(batch_number) >= 1 AND length(batch_number) <= 100),
            quantity_received INTEGER NOT NULL CHECK(quantity_received > 0),
            quantity_remaining INTEGER NOT NULL CHECK(
                quantity_remaining >= 0 AND quantity_remaining <= quantity_received
            ),
            quantity_sold INTEGER NOT NULL DEFAULT 0 CHECK(quantity_sold >= 0),
            received_date DATETIME NOT NULL,
            expiry_date DATETIME,
            status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active', 'depleted')),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (product_id) REFERENCES products (id) ON DELETE CASCADE,
            UNIQUE(product_id, warehouse, zone, batch_number)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Audit sessions: in_progress -> pending_approval -> completed
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_sessions (
            id TEXT PRIMARY KEY,
            warehouse TEXT NOT NULL,
            zone TEXT,
            audit_type TEXT NOT NULL CHECK(audit_type IN ('full', 'cycle', 'spot')),
            status TEXT NOT NULL DEFAULT 'in_progress' CHECK(
                status IN ('in_progress', 'pending_approval', 'completed')
            ),
            created_by TEXT NOT NULL,
            approved_by TEXT,
            created_at DATETIME NOT NULL,
            submitted_at DATETIME,
            approved_at DATETIME
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Worksheet items snapshot system quantities at audit creation
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS worksheet_items (
            id TEXT PRIMARY KEY,
            audit_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            warehouse TEXT NOT NULL,
            zone TEXT NOT NULL,
            system_quantity INTEGER NOT NULL CHECK(system_quantity >= 0),
            counted_quantity INTEGER CHECK(counted_quantity IS NULL OR counted_quantity >= 0),
            variance INTEGER,
            counted_by TEXT,
            counted_at DATETIME,
            FOREIGN KEY (audit_id) REFERENCES audit_sessions (id) ON DELETE CASCADE,
            FOREIGN KEY (product_id) REFERENCES products (id),
            UNIQUE(audit_id, product_id, warehouse, zone)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS discrepancies (
            id TEXT PRIMARY KEY,
            audit_id TEXT NOT NULL,
            worksheet_item_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'resolved')),
            resolution TEXT CHECK(resolution IS NULL OR resolution IN ('adjust', 'accept_system')),
            adjustment_reason TEXT CHECK(adjustment_reason IS NULL OR length(adjustment_reason) <= 500),
            resolved_by TEXT,
            resolved_at DATETIME,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (audit_id) REFERENCES audit_sessions (id) ON DELETE CASCADE,
            FOREIGN KEY (worksheet_item_id) REFERENCES worksheet_items (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Custody items: one row per serialized high-value instance
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS custody_items (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL,
            serial_number TEXT NOT NULL UNIQUE CHECK(length(serial_number) >= 1 AND length(serial_number) <= 100),
            label TEXT CHECK(label IS NULL OR length(label) <= 255),
            current_custodian TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'in_storage' CHECK(
                status IN ('in_storage', 'in_transit', 'assigned')
            ),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (product_id) REFERENCES products (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Custody transfers are append-only; acknowledged_at is the only column
    // written after insert
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS custody_transfers (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            from_custodian TEXT NOT NULL,
            to_custodian TEXT NOT NULL,
            purpose TEXT NOT NULL CHECK(purpose IN ('storage', 'assignment')),
            reason TEXT NOT NULL CHECK(length(reason) >= 1 AND length(reason) <= 500),
            authorized_by TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            acknowledged_at DATETIME,
            FOREIGN KEY (item_id) REFERENCES custody_items (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS approval_requests (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            to_custodian TEXT NOT NULL,
            purpose TEXT NOT NULL CHECK(purpose IN ('storage', 'assignment')),
            reason TEXT NOT NULL CHECK(length(reason) >= 1 AND length(reason) <= 500),
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'approved', 'rejected')),
            approver TEXT,
            notes TEXT CHECK(notes IS NULL OR length(notes) <= 500),
            created_at DATETIME NOT NULL,
            decided_at DATETIME,
            FOREIGN KEY (item_id) REFERENCES custody_items (id) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Activity log: additive only, never rewritten
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activity_log (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            details TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // ==================== INDEXES ====================

    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_location_stock_product ON location_stock(product_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_location_stock_scope ON location_stock(warehouse, zone)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_batches_scope ON batches(product_id, warehouse, zone, status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_batches_received ON batches(received_date)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_batches_expiry ON batches(expiry_date)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_sessions_status ON audit_sessions(status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_worksheet_items_audit ON worksheet_items(audit_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_discrepancies_audit ON discrepancies(audit_id, status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_custody_transfers_item ON custody_transfers(item_id)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_approval_requests_item ON approval_requests(item_id, status)")
        .execute(pool).await;
    let _ = sqlx::query("CREATE INDEX IF NOT EXISTS idx_activity_log_entity ON activity_log(entity_type, entity_id)")
        .execute(pool).await;

    Ok(())
}

// ==================== DATABASE RESET (DEVELOPMENT ONLY) ====================

pub async fn reset_database(pool: &SqlitePool) -> Result<()> {
    log::warn!("Resetting database - all data will be lost!");

    let drop_queries = [
        "DROP TABLE IF EXISTS activity_log",
        "DROP TABLE IF EXISTS approval_requests",
        "DROP TABLE IF EXISTS custody_transfers",
        "DROP TABLE IF EXISTS custody_items",
        "DROP TABLE IF EXISTS discrepancies",
        "DROP TABLE IF EXISTS worksheet_items",
        "DROP TABLE IF EXISTS audit_sessions",
        "DROP TABLE IF EXISTS batches",
        "DROP TABLE IF EXISTS location_stock",
        "DROP TABLE IF EXISTS products",
    ];

    for query in drop_queries.iter() {
        let _ = sqlx::query(query).execute(pool).await;
    }

    run_migrations(pool).await?;

    Ok(())
}

// ==================== TEST SUPPORT ====================

/// In-memory pool pinned to a single connection, since every connection to
/// `sqlite::memory:` would otherwise see its own empty database.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");
    run_migrations(&pool).await.expect("migrations failed");
    pool
}
