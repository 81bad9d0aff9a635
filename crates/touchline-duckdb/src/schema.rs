/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// open.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `TOUCHLINE_DUCKDB_MEMORY`, default `"1GB"`). Always set an explicit
/// limit: the DuckDB default is 80% of system RAM.
///
/// Timestamps are epoch microseconds stored as BIGINT, the layout of GA4
/// exports. Calendar dates are derived in the reporting timezone by the
/// pipeline, never by SQL.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- EVENTS (raw clickstream, one row per tracked interaction)
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    cookie_id        VARCHAR,
    session_number   BIGINT,
    event_name       VARCHAR NOT NULL,
    event_timestamp  BIGINT NOT NULL,
    session_engaged  BOOLEAN,
    country          VARCHAR,
    source           VARCHAR,                      -- collected on the event (UTM)
    medium           VARCHAR,
    campaign         VARCHAR,
    click_id         VARCHAR,                      -- gclid
    first_source     VARCHAR,                      -- user acquisition source
    first_medium     VARCHAR,
    first_campaign   VARCHAR,
    item_quantity    BIGINT,
    purchase_revenue DOUBLE,
    consent          BOOLEAN                       -- NULL = not recorded
);
CREATE INDEX IF NOT EXISTS idx_events_cookie_session
    ON events(cookie_id, session_number);

-- ===========================================
-- SOURCE CATEGORIES (search / shopping / social / video)
-- ===========================================
CREATE TABLE IF NOT EXISTS source_categories (
    source          VARCHAR NOT NULL,
    category        VARCHAR NOT NULL,
    PRIMARY KEY (category, source)
);

-- ===========================================
-- ATTRIBUTION EVENTS (one row per session x channel group)
-- Fully replaced on every run.
-- ===========================================
CREATE TABLE IF NOT EXISTS attribution_events (
    session_id            VARCHAR NOT NULL,
    cookie_id             VARCHAR,
    is_engaged            BOOLEAN NOT NULL,
    country_web           VARCHAR,
    f_tp                  BOOLEAN NOT NULL,
    event_timestamp       BIGINT NOT NULL,
    source                VARCHAR NOT NULL,
    medium                VARCHAR NOT NULL,
    campaign              VARCHAR NOT NULL,
    source_medium         VARCHAR NOT NULL,
    channel_group         VARCHAR NOT NULL,
    f_converted           BOOLEAN NOT NULL,
    total_transactions    BIGINT NOT NULL,
    total_item_quantity   BIGINT NOT NULL,
    session_revenue_usd   DOUBLE NOT NULL,
    first_event_timestamp BIGINT NOT NULL,
    last_event_timestamp  BIGINT NOT NULL,
    PRIMARY KEY (session_id, channel_group)
);

-- ===========================================
-- ATTRIBUTION CHAINS (touchpoints leading to a conversion in the period)
-- Fully replaced on every run.
-- ===========================================
CREATE TABLE IF NOT EXISTS attribution_chains (
    cookie_id             VARCHAR NOT NULL,
    session_id            VARCHAR NOT NULL,
    country               VARCHAR,
    is_engaged            BOOLEAN NOT NULL,
    source                VARCHAR NOT NULL,
    medium                VARCHAR NOT NULL,
    campaign              VARCHAR NOT NULL,
    source_medium         VARCHAR NOT NULL,
    channel_group         VARCHAR NOT NULL,
    event_timestamp       BIGINT NOT NULL,
    f_converted           BOOLEAN NOT NULL,
    total_transactions    BIGINT NOT NULL,
    total_item_quantity   BIGINT NOT NULL,
    session_revenue_usd   DOUBLE NOT NULL,
    first_event_timestamp BIGINT NOT NULL,
    last_event_timestamp  BIGINT NOT NULL,
    row_order             INTEGER NOT NULL       -- position in chain order
);

-- ===========================================
-- CONVERSION PATHS (one row per attributed purchase)
-- Fully replaced on every run.
-- ===========================================
CREATE TABLE IF NOT EXISTS conversion_paths (
    conversion_id        VARCHAR PRIMARY KEY,    -- '<session_id>.<YYYYMMDD>'
    customer_id          VARCHAR NOT NULL,
    conversion_timestamp BIGINT NOT NULL,
    path                 VARCHAR NOT NULL,       -- channel labels joined by ' > '
    chain_len            INTEGER NOT NULL,
    first_event          DATE NOT NULL,
    purchase_date        DATE NOT NULL,
    chain_duration_days  INTEGER NOT NULL,
    purchase_value       DOUBLE NOT NULL
);
"#
    )
}
