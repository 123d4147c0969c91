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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error, got: {}",
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
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
        self.next_id += 1;
        let id = self.next_id.to_string();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn create_user(&mut self, role: &str, last: &str, first: &str) -> String {
        let result = self.ok(
            "users.create",
            json!({ "role": role, "lastName": last, "firstName": first }),
        );
        result["userId"].as_str().expect("userId").to_string()
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

// 2030-04-02 is a Tuesday, 2030-04-06 a Saturday (Manila time).

#[test]
fn weekend_slots_are_rejected() {
    let mut office = Office::open("counseld-slot-weekend");
    let student = office.create_user("student", "Reyes", "Ana");
    let counselor = office.create_user("counselor", "Cruz", "Liza");

    let resp = office.call(
        "appointments.book",
        json!({
            "studentId": student,
            "counselorId": counselor,
            "dateTime": "2030-04-06T10:00:00+08:00"
        }),
    );
    assert_eq!(error_code(&resp), "weekend");

    office.finish();
}

#[test]
fn off_hour_and_closed_hours_are_rejected() {
    let mut office = Office::open("counseld-slot-hours");
    let student = office.create_user("student", "Reyes", "Ana");
    let counselor = office.create_user("counselor", "Cruz", "Liza");

    let resp = office.call(
        "appointments.book",
        json!({
            "studentId": student,
            "counselorId": counselor,
            "dateTime": "2030-04-02T10:30:00+08:00"
        }),
    );
    assert_eq!(error_code(&resp), "not_on_hour");

    for hour in ["12", "19", "07", "22"] {
        let resp = office.call(
            "appointments.book",
            json!({
                "studentId": student,
                "counselorId": counselor,
                "dateTime": format!("2030-04-02T{}:00:00+08:00", hour)
            }),
        );
        assert_eq!(error_code(&resp), "outside_working_hours", "hour {}", hour);
    }

    // The evening band includes its final hour.
    let result = office.ok(
        "appointments.book",
        json!({
            "studentId": student,
            "counselorId": counselor,
            "dateTime": "2030-04-02T21:00:00+08:00"
        }),
    );
    assert_eq!(result["status"].as_str(), Some("pending"));

    office.finish();
}

#[test]
fn double_booking_the_same_slot_is_rejected() {
    let mut office = Office::open("counseld-slot-conflict");
    let first = office.create_user("student", "Reyes", "Ana");
    let second = office.create_user("student", "Lim", "Ben");
    let counselor = office.create_user("counselor", "Cruz", "Liza");

    let booked = office.ok(
        "appointments.book",
        json!({
            "studentId": first,
            "counselorId": counselor,
            "dateTime": "2030-04-02T14:00:00+08:00"
        }),
    );
    assert_eq!(booked["status"].as_str(), Some("pending"));
    assert_eq!(
        booked["dateTime"].as_str(),
        Some("2030-04-02T06:00:00Z"),
        "slot keys normalize to UTC"
    );

    // Any other student, same wall-clock slot expressed in UTC.
    let resp = office.call(
        "appointments.book",
        json!({
            "studentId": second,
            "counselorId": counselor,
            "dateTime": "2030-04-02T06:00:00Z"
        }),
    );
    assert_eq!(error_code(&resp), "slot_taken");

    office.finish();
}

#[test]
fn cancelled_appointments_release_their_slot() {
    let mut office = Office::open("counseld-slot-release");
    let first = office.create_user("student", "Reyes", "Ana");
    let second = office.create_user("student", "Lim", "Ben");
    let counselor = office.create_user("counselor", "Cruz", "Liza");

    let booked = office.ok(
        "appointments.book",
        json!({
            "studentId": first,
            "counselorId": counselor,
            "dateTime": "2030-04-02T15:00:00+08:00"
        }),
    );
    let appointment_id = booked["appointmentId"].as_str().expect("id").to_string();

    office.ok(
        "appointments.cancel",
        json!({ "appointmentId": appointment_id, "studentId": first }),
    );

    let rebooked = office.ok(
        "appointments.book",
        json!({
            "studentId": second,
            "counselorId": counselor,
            "dateTime": "2030-04-02T15:00:00+08:00"
        }),
    );
    assert_eq!(rebooked["status"].as_str(), Some("pending"));

    office.finish();
}

#[test]
fn reschedule_excludes_self_but_not_others() {
    let mut office = Office::open("counseld-slot-reschedule");
    let student = office.create_user("student", "Reyes", "Ana");
    let counselor = office.create_user("counselor", "Cruz", "Liza");

    let first = office.ok(
        "appointments.book",
        json!({
            "studentId": student,
            "counselorId": counselor,
            "dateTime": "2030-04-02T14:00:00+08:00"
        }),
    );
    let first_id = first["appointmentId"].as_str().expect("id").to_string();
    let second = office.ok(
        "appointments.book",
        json!({
            "studentId": student,
            "counselorId": counselor,
            "dateTime": "2030-04-02T16:00:00+08:00"
        }),
    );
    let second_id = second["appointmentId"].as_str().expect("id").to_string();

    // Re-confirming its own slot is not a conflict.
    let same = office.ok(
        "appointments.reschedule",
        json!({ "appointmentId": first_id, "dateTime": "2030-04-02T14:00:00+08:00" }),
    );
    assert_eq!(same["dateTime"].as_str(), Some("2030-04-02T06:00:00Z"));

    // Moving onto another live booking is.
    let clash = office.call(
        "appointments.reschedule",
        json!({ "appointmentId": second_id, "dateTime": "2030-04-02T14:00:00+08:00" }),
    );
    assert_eq!(error_code(&clash), "slot_taken");

    // Reschedule runs the same hour rules as booking, hour 21 included.
    let weekend = office.call(
        "appointments.reschedule",
        json!({ "appointmentId": second_id, "dateTime": "2030-04-06T10:00:00+08:00" }),
    );
    assert_eq!(error_code(&weekend), "weekend");
    let late = office.ok(
        "appointments.reschedule",
        json!({ "appointmentId": second_id, "dateTime": "2030-04-02T21:00:00+08:00" }),
    );
    assert_eq!(late["dateTime"].as_str(), Some("2030-04-02T13:00:00Z"));

    office.finish();
}
