use dotenv::dotenv;
use sqlx::SqlitePool;
use std::env;

pub async fn create_db_pool() -> SqlitePool {
    // Load .env file
    dotenv().ok();

    // Get database URL from environment variable
    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    // Create connection pool
    let pool = SqlitePool::connect(&db_url).await.unwrap();

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    pool
}
