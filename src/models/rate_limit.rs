use sqlx::{FromRow, SqlitePool};

/// Counter row for one `(identifier, endpoint_class)` key.
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitRecord {
    pub request_count: i64,
    pub window_start: i64,
    pub blocked_until: Option<i64>,
}

impl RateLimitRecord {
    /// Apply one request to the counter and return the resulting record.
    ///
    /// The whole fixed-window algorithm runs inside a single upsert so that
    /// concurrent requests -- including ones served by other instances
    /// sharing this database -- cannot both observe `count < max` and slip
    /// past the limit. Unqualified columns in the CASE arms refer to the
    /// pre-update row:
    ///   - an unexpired block leaves the row untouched,
    ///   - an elapsed window resets to count=1,
    ///   - under the limit the count increments,
    ///   - at the limit the row escalates to blocked.
    pub async fn hit(
        pool: &SqlitePool,
        identifier: &str,
        endpoint_class: &str,
        now: i64,
        window_secs: i64,
        max_requests: i64,
        block_secs: i64,
    ) -> Result<RateLimitRecord, sqlx::Error> {
        sqlx::query_as::<_, RateLimitRecord>(
            "INSERT INTO rate_limits \
                 (identifier, endpoint_class, request_count, window_start, blocked_until) \
             VALUES (?1, ?2, 1, ?3, NULL) \
             ON CONFLICT(identifier, endpoint_class) DO UPDATE SET \
                 request_count = CASE \
                     WHEN blocked_until IS NOT NULL AND blocked_until > ?3 THEN request_count \
                     WHEN window_start + ?4 < ?3 THEN 1 \
                     WHEN request_count < ?5 THEN request_count + 1 \
                     ELSE request_count \
                 END, \
                 blocked_until = CASE \
                     WHEN blocked_until IS NOT NULL AND blocked_until > ?3 THEN blocked_until \
                     WHEN window_start + ?4 < ?3 THEN NULL \
                     WHEN request_count < ?5 THEN blocked_until \
                     ELSE ?3 + ?6 \
                 END, \
                 window_start = CASE \
                     WHEN blocked_until IS NOT NULL AND blocked_until > ?3 THEN window_start \
                     WHEN window_start + ?4 < ?3 THEN ?3 \
                     ELSE window_start \
                 END \
             RETURNING request_count, window_start, blocked_until",
        )
        .bind(identifier)
        .bind(endpoint_class)
        .bind(now)
        .bind(window_secs)
        .bind(max_requests)
        .bind(block_secs)
        .fetch_one(pool)
        .await
    }
}
