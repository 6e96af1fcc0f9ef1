//! Ordered migration list, one migration per table, so
//! `Rollback`/`MigrateToVersion` have something granular to step through.

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create projects",
        up: "CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            current_stage TEXT NOT NULL,
            current_phase_id TEXT
        );",
        down: "DROP TABLE IF EXISTS projects;",
    },
    Migration {
        version: 2,
        description: "create interview_data",
        up: "CREATE TABLE IF NOT EXISTS interview_data (
            project_id TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
            project_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            problem_statement TEXT NOT NULL,
            target_users TEXT NOT NULL,
            success_metrics TEXT NOT NULL,
            technical_stack TEXT NOT NULL,
            integrations TEXT NOT NULL,
            scope TEXT NOT NULL,
            constraints TEXT NOT NULL,
            assumptions TEXT NOT NULL,
            unknowns TEXT NOT NULL,
            refinement_history TEXT NOT NULL,
            raw_session TEXT NOT NULL
        );",
        down: "DROP TABLE IF EXISTS interview_data;",
    },
    Migration {
        version: 3,
        description: "create architectures",
        up: "CREATE TABLE IF NOT EXISTS architectures (
            project_id TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );",
        down: "DROP TABLE IF EXISTS architectures;",
    },
    Migration {
        version: 4,
        description: "create phases",
        up: "CREATE TABLE IF NOT EXISTS phases (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            number INTEGER NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            UNIQUE(project_id, number)
        );
        CREATE INDEX IF NOT EXISTS idx_phases_project ON phases(project_id);",
        down: "DROP TABLE IF EXISTS phases;",
    },
    Migration {
        version: 5,
        description: "create tasks",
        up: "CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            phase_id TEXT NOT NULL REFERENCES phases(id) ON DELETE CASCADE,
            number TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_phase ON tasks(phase_id);",
        down: "DROP TABLE IF EXISTS tasks;",
    },
    Migration {
        version: 6,
        description: "create checkpoints",
        up: "CREATE TABLE IF NOT EXISTS checkpoints (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            external_tag TEXT NOT NULL,
            created_at TEXT NOT NULL,
            metadata TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_checkpoints_project ON checkpoints(project_id);",
        down: "DROP TABLE IF EXISTS checkpoints;",
    },
    Migration {
        version: 7,
        description: "create token_usage",
        up: "CREATE TABLE IF NOT EXISTS token_usage (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            phase_id TEXT,
            task_id TEXT,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            tokens_input INTEGER NOT NULL,
            tokens_output INTEGER NOT NULL,
            cost REAL NOT NULL,
            timestamp TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_token_usage_project ON token_usage(project_id);",
        down: "DROP TABLE IF EXISTS token_usage;",
    },
    Migration {
        version: 8,
        description: "create rate_limit_info",
        up: "CREATE TABLE IF NOT EXISTS rate_limit_info (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT NOT NULL,
            requests_remaining INTEGER NOT NULL,
            requests_limit INTEGER NOT NULL,
            reset_at TEXT NOT NULL,
            checked_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rate_limit_provider ON rate_limit_info(provider, checked_at);",
        down: "DROP TABLE IF EXISTS rate_limit_info;",
    },
    Migration {
        version: 9,
        description: "create quota_info",
        up: "CREATE TABLE IF NOT EXISTS quota_info (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT NOT NULL,
            tokens_remaining INTEGER,
            tokens_limit INTEGER,
            cost_remaining REAL,
            cost_limit REAL,
            reset_at TEXT NOT NULL,
            checked_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_quota_provider ON quota_info(provider, checked_at);",
        down: "DROP TABLE IF EXISTS quota_info;",
    },
    Migration {
        version: 10,
        description: "create token_stats_cache",
        up: "CREATE TABLE IF NOT EXISTS token_stats_cache (
            project_id TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
            total_input INTEGER NOT NULL,
            total_output INTEGER NOT NULL,
            by_provider TEXT NOT NULL,
            by_phase TEXT NOT NULL,
            last_updated TEXT
        );",
        down: "DROP TABLE IF EXISTS token_stats_cache;",
    },
    Migration {
        version: 11,
        description: "create blockers",
        up: "CREATE TABLE IF NOT EXISTS blockers (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            description TEXT NOT NULL,
            resolution TEXT,
            created_at TEXT NOT NULL,
            resolved_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_blockers_task ON blockers(task_id);",
        down: "DROP TABLE IF EXISTS blockers;",
    },
    Migration {
        version: 12,
        description: "create detours",
        up: "CREATE TABLE IF NOT EXISTS detours (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            phase_id TEXT NOT NULL REFERENCES phases(id) ON DELETE CASCADE,
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            description TEXT NOT NULL,
            reason TEXT NOT NULL,
            new_task_ids TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_detours_project ON detours(project_id);",
        down: "DROP TABLE IF EXISTS detours;",
    },
    Migration {
        version: 13,
        description: "create config",
        up: "CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
        down: "DROP TABLE IF EXISTS config;",
    },
];
