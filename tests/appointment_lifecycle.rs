use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_counseld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn counseld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

struct Office {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    workspace: PathBuf,
    next_id: u32,
}

impl Office {
    fn open(prefix: &str) -> Self {
        let workspace = temp_dir(prefix);
        let (child, stdin, reader) = spawn_sidecar();
        let mut office = Office {
            child,
            stdin,
            reader,
            workspace,
            next_id: 0,
        };
        let path = office.workspace.to_string_lossy().to_string();
        office.ok("workspace.select", json!({ "path": path }));
        office
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "call failed: {}",
            value
        );
        value["result"].clone()
    }

    fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "expected error: {}",
            value
        );
        value["error"]["code"].as_str().unwrap_or("unknown").to_string()
    }

    fn create_user(&mut self, role: &str, last: &str, first: &str) -> String {
        let result = self.ok(
            "users.create",
            json!({ "role": role, "lastName": last, "firstName": first }),
        );
        result["userId"].as_str().expect("userId").to_string()
    }

    fn book(&mut self, student: &str, counselor: &str, date_time: &str) -> String {
        let result = self.ok(
            "appointments.book",
            json!({
                "studentId": student,
                "counselorId": counselor,
                "dateTime": date_time
            }),
        );
        result["appointmentId"].as_str().expect("id").to_string()
    }

    fn status_of(&mut self, appointment_id: &str) -> String {
        let result = self.ok(
            "appointments.get",
            json!({ "appointmentId": appointment_id }),
        );
        result["appointment"]["status"]
            .as_str()
            .expect("status")
            .to_string()
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

#[test]
fn confirm_then_close_happy_path() {
    let mut office = Office::open("counseld-lifecycle-confirm");
    let student = office.create_user("student", "Reyes", "Ana");
    let counselor = office.create_user("counselor", "Cruz", "Liza");
    let appointment = office.book(&student, &counselor, "2030-04-02T09:00:00+08:00");

    office.ok("appointments.confirm", json!({ "appointmentId": appointment }));
    assert_eq!(office.status_of(&appointment), "confirmed");

    // A confirmed appointment cannot be confirmed twice or cancelled.
    assert_eq!(
        office.err_code("appointments.confirm", json!({ "appointmentId": appointment })),
        "invalid_status"
    );
    assert_eq!(
        office.err_code(
            "appointments.cancel",
            json!({ "appointmentId": appointment, "studentId": student })
        ),
        "invalid_status"
    );

    office.ok("appointments.close", json!({ "appointmentId": appointment }));
    assert_eq!(office.status_of(&appointment), "closed");
    assert_eq!(
        office.err_code("appointments.close", json!({ "appointmentId": appointment })),
        "invalid_status"
    );

    office.finish();
}

#[test]
fn only_the_owning_student_cancels() {
    let mut office = Office::open("counseld-lifecycle-cancel");
    let owner = office.create_user("student", "Reyes", "Ana");
    let other = office.create_user("student", "Lim", "Ben");
    let counselor = office.create_user("counselor", "Cruz", "Liza");
    let appointment = office.book(&owner, &counselor, "2030-04-02T10:00:00+08:00");

    assert_eq!(
        office.err_code(
            "appointments.cancel",
            json!({ "appointmentId": appointment, "studentId": other })
        ),
        "forbidden"
    );

    office.ok(
        "appointments.cancel",
        json!({ "appointmentId": appointment, "studentId": owner }),
    );
    assert_eq!(office.status_of(&appointment), "cancelled");

    office.finish();
}

#[test]
fn sweep_closes_only_stale_pending_appointments() {
    let mut office = Office::open("counseld-lifecycle-sweep");
    let student = office.create_user("student", "Reyes", "Ana");
    let counselor = office.create_user("counselor", "Cruz", "Liza");

    // Monday and Tuesday slots around the sweep clock below.
    let stale = office.book(&student, &counselor, "2030-04-01T09:00:00+08:00");
    let fresh = office.book(&student, &counselor, "2030-04-02T14:00:00+08:00");
    let confirmed = office.book(&student, &counselor, "2030-04-01T10:00:00+08:00");
    office.ok("appointments.confirm", json!({ "appointmentId": confirmed }));

    // Sweep clock: Tuesday 12:00 Manila. The Monday slots are more than an
    // hour old; only the pending one closes.
    let result = office.ok(
        "appointments.sweepStale",
        json!({ "now": "2030-04-02T12:00:00+08:00" }),
    );
    assert_eq!(result["closed"].as_i64(), Some(1));

    assert_eq!(office.status_of(&stale), "closed");
    assert_eq!(office.status_of(&fresh), "pending");
    assert_eq!(office.status_of(&confirmed), "confirmed");

    // Second sweep with the same clock finds nothing new.
    let again = office.ok(
        "appointments.sweepStale",
        json!({ "now": "2030-04-02T12:00:00+08:00" }),
    );
    assert_eq!(again["closed"].as_i64(), Some(0));

    office.finish();
}

#[test]
fn slot_stays_blocked_while_pending_or_confirmed() {
    let mut office = Office::open("counseld-lifecycle-blocked");
    let first = office.create_user("student", "Reyes", "Ana");
    let second = office.create_user("student", "Lim", "Ben");
    let counselor = office.create_user("counselor", "Cruz", "Liza");

    let appointment = office.book(&first, &counselor, "2030-04-02T11:00:00+08:00");
    office.ok("appointments.confirm", json!({ "appointmentId": appointment }));

    assert_eq!(
        office.err_code(
            "appointments.book",
            json!({
                "studentId": second,
                "counselorId": counselor,
                "dateTime": "2030-04-02T11:00:00+08:00"
            })
        ),
        "slot_taken"
    );

    office.finish();
}
