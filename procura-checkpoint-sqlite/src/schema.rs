pub const CHECKPOINTS_TABLE: &str = "checkpoints";
pub const MESSAGES_TABLE: &str = "messages";

pub const CREATE_CHECKPOINTS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS checkpoints (\
    thread_id TEXT NOT NULL,\
    seq INTEGER NOT NULL,\
    created_at TEXT NOT NULL,\
    node TEXT,\
    step INTEGER NOT NULL,\
    state_json TEXT NOT NULL,\
    PRIMARY KEY (thread_id, seq)\
)";

pub const CREATE_MESSAGES_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS messages (\
    thread_id TEXT NOT NULL,\
    seq INTEGER NOT NULL,\
    message_id TEXT NOT NULL UNIQUE,\
    role TEXT NOT NULL,\
    content TEXT NOT NULL,\
    metrics_json TEXT,\
    created_at TEXT NOT NULL,\
    PRIMARY KEY (thread_id, seq)\
)";

pub const MIGRATION_STATEMENTS_SQL: [&str; 2] =
    [CREATE_CHECKPOINTS_TABLE_SQL, CREATE_MESSAGES_TABLE_SQL];
