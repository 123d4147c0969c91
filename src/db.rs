use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "counsel.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            email TEXT UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS appointments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            counselor_id TEXT NOT NULL,
            date_time TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'self',
            status TEXT NOT NULL DEFAULT 'pending',
            reason TEXT,
            notes TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(counselor_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_appointments_student ON appointments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_appointments_counselor ON appointments(counselor_id)",
        [],
    )?;
    // The counseling office is a single resource: one live booking per exact
    // slot, system-wide. Cancelled rows release the slot. This index is the
    // authoritative conflict guard; handler-level SELECTs are a fast path.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_slot
         ON appointments(date_time) WHERE status != 'cancelled'",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS appointment_requests(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            urgency TEXT,
            kind TEXT NOT NULL DEFAULT 'self',
            notes TEXT,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_requests_student ON appointment_requests(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS referrals(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            counselor_id TEXT,
            reason TEXT NOT NULL,
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            appointment_id TEXT,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(counselor_id) REFERENCES users(id),
            FOREIGN KEY(appointment_id) REFERENCES appointments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_referrals_student ON referrals(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_referrals_teacher ON referrals(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS appraisal_templates(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            created_by TEXT,
            created_at TEXT,
            FOREIGN KEY(created_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS template_categories(
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(template_id) REFERENCES appraisal_templates(id),
            UNIQUE(template_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_template_categories_template
         ON template_categories(template_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS template_questions(
            id TEXT PRIMARY KEY,
            category_id TEXT NOT NULL,
            prompt TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(category_id) REFERENCES template_categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_template_questions_category
         ON template_questions(category_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_criteria(
            id TEXT PRIMARY KEY,
            category_id TEXT NOT NULL,
            min_score REAL NOT NULL,
            max_score REAL NOT NULL,
            label TEXT NOT NULL,
            description TEXT,
            suggestion TEXT,
            FOREIGN KEY(category_id) REFERENCES template_categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluation_criteria_category
         ON evaluation_criteria(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_appraisals(
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            submitted_at TEXT,
            FOREIGN KEY(template_id) REFERENCES appraisal_templates(id),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_appraisals_student
         ON student_appraisals(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS category_responses(
            id TEXT PRIMARY KEY,
            appraisal_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            score REAL NOT NULL,
            FOREIGN KEY(appraisal_id) REFERENCES student_appraisals(id),
            FOREIGN KEY(category_id) REFERENCES template_categories(id),
            UNIQUE(appraisal_id, category_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_category_responses_appraisal
         ON category_responses(appraisal_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_responses(
            id TEXT PRIMARY KEY,
            appraisal_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            response INTEGER NOT NULL,
            FOREIGN KEY(appraisal_id) REFERENCES student_appraisals(id),
            FOREIGN KEY(question_id) REFERENCES template_questions(id),
            UNIQUE(appraisal_id, question_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_responses_appraisal
         ON question_responses(appraisal_id)",
        [],
    )?;

    // Older fixed-rubric flow: three areas scored 0-100 raw, normalized /20.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS legacy_appraisals(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            academic_raw REAL NOT NULL,
            socio_emotional_raw REAL NOT NULL,
            career_raw REAL NOT NULL,
            academic REAL NOT NULL,
            socio_emotional REAL NOT NULL,
            career REAL NOT NULL,
            overall REAL NOT NULL,
            submitted_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_legacy_appraisals_student
         ON legacy_appraisals(student_id)",
        [],
    )?;

    // Workspaces created before referrals carried a timestamp.
    ensure_referrals_created_at(&conn)?;

    Ok(conn)
}

fn ensure_referrals_created_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "referrals", "created_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE referrals ADD COLUMN created_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
