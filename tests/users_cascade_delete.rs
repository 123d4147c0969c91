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

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

#[test]
fn deleting_a_student_removes_every_dependent_record() {
    let mut office = Office::open("counseld-cascade");
    let student = office.create_user("student", "Reyes", "Ana");
    let other = office.create_user("student", "Lim", "Ben");
    let teacher = office.create_user("teacher", "Santos", "Jose");
    let counselor = office.create_user("counselor", "Cruz", "Liza");

    office.ok(
        "appointments.book",
        json!({
            "studentId": student,
            "counselorId": counselor,
            "dateTime": "2030-04-02T14:00:00+08:00"
        }),
    );
    office.ok(
        "requests.create",
        json!({ "studentId": student, "reason": "study load" }),
    );
    office.ok(
        "referrals.create",
        json!({
            "studentId": student,
            "teacherId": teacher,
            "reason": "absences"
        }),
    );
    let template = office.ok(
        "templates.create",
        json!({
            "title": "Mini Check",
            "categories": [
                { "name": "Academic", "questions": ["I keep up with homework."] }
            ]
        }),
    );
    let template_id = template["templateId"].as_str().expect("id").to_string();
    let fetched = office.ok("templates.get", json!({ "templateId": template_id }));
    let question_id = fetched["template"]["categories"][0]["questions"][0]["id"]
        .as_str()
        .expect("qid")
        .to_string();
    office.ok(
        "appraisals.submit",
        json!({
            "templateId": template_id,
            "studentId": student,
            "responses": [ { "questionId": question_id, "response": 4 } ]
        }),
    );
    office.ok(
        "legacyAppraisals.submit",
        json!({
            "studentId": student,
            "academic": 80,
            "socioEmotional": 60,
            "career": 70
        }),
    );

    office.ok("users.delete", json!({ "userId": student }));
    assert_eq!(
        office.err_code("users.delete", json!({ "userId": student })),
        "not_found"
    );

    let appointments = office.ok("appointments.list", json!({ "studentId": student }));
    assert_eq!(appointments["appointments"].as_array().map(Vec::len), Some(0));
    let requests = office.ok("requests.list", json!({}));
    assert_eq!(requests["requests"].as_array().map(Vec::len), Some(0));
    let referrals = office.ok("referrals.list", json!({}));
    assert_eq!(referrals["referrals"].as_array().map(Vec::len), Some(0));
    let appraisals = office.ok("appraisals.list", json!({}));
    assert_eq!(appraisals["appraisals"].as_array().map(Vec::len), Some(0));
    let legacy = office.ok("legacyAppraisals.list", json!({}));
    assert_eq!(legacy["appraisals"].as_array().map(Vec::len), Some(0));

    // The template survives, and the deleted student's slot is free again.
    let templates = office.ok("templates.list", json!({}));
    assert_eq!(templates["templates"].as_array().map(Vec::len), Some(1));
    office.ok(
        "appointments.book",
        json!({
            "studentId": other,
            "counselorId": counselor,
            "dateTime": "2030-04-02T14:00:00+08:00"
        }),
    );

    office.finish();
}

#[test]
fn deleting_a_template_removes_its_submissions() {
    let mut office = Office::open("counseld-template-delete");
    let student = office.create_user("student", "Reyes", "Ana");

    let template = office.ok(
        "templates.create",
        json!({
            "title": "Disposable",
            "categories": [
                { "name": "Academic", "questions": ["I keep up with homework."] }
            ]
        }),
    );
    let template_id = template["templateId"].as_str().expect("id").to_string();
    let fetched = office.ok("templates.get", json!({ "templateId": template_id }));
    let question_id = fetched["template"]["categories"][0]["questions"][0]["id"]
        .as_str()
        .expect("qid")
        .to_string();
    office.ok(
        "appraisals.submit",
        json!({
            "templateId": template_id,
            "studentId": student,
            "responses": [ { "questionId": question_id, "response": 5 } ]
        }),
    );

    office.ok("templates.delete", json!({ "templateId": template_id }));
    assert_eq!(
        office.err_code("templates.get", json!({ "templateId": template_id })),
        "not_found"
    );
    let appraisals = office.ok("appraisals.list", json!({ "studentId": student }));
    assert_eq!(appraisals["appraisals"].as_array().map(Vec::len), Some(0));

    office.finish();
}
