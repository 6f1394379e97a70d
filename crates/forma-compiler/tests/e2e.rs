//! End-to-end compilation tests over on-disk project fixtures.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use forma_compiler::emit::{register_envelope, ENVELOPE_TYPE};
use forma_compiler::{compile_source, CompileError};
use forma_schema::{json, parser, DynamicMessage, FieldValue, TypeRegistry};

struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file under `src/`.
    fn write(&self, rel: &str, content: &str) -> &Self {
        let path = self.root().join("src").join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
        self
    }

    fn compile(&self, source: &str) -> Result<Vec<PathBuf>, CompileError> {
        compile_source(self.root(), source)
    }

    fn output(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join("materialized_config").join(rel)).unwrap()
    }
}

const GREET_PROTO: &str = "\
syntax = \"proto3\";

message Hello {
    string name = 1;
}
";

// === Scenario 1: single, trivial ===

#[test]
fn test_single_trivial() {
    let project = Project::new();
    project.write("greet.proto", GREET_PROTO).write(
        "hi.pconf",
        "\
load(\"greet.proto\", \"Hello\")

def main():
    return Hello(name = \"world\")
",
    );

    let written = project.compile("hi.pconf").unwrap();
    assert_eq!(written.len(), 1);
    assert!(written[0].ends_with("materialized_config/hi.materialized_JSON"));

    let text = project.output("hi.materialized_JSON");
    assert!(text.ends_with('\n'));
    assert!(text.contains("  \"proto_file\""), "two-space indent");

    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["proto_file"], "greet.proto");
    assert_eq!(parsed["value"]["@type"], "type.googleapis.com/Hello");
    assert_eq!(parsed["value"]["name"], "world");
    assert_eq!(parsed.as_object().unwrap().len(), 2);
}

// === Scenario 2: multi output ===

#[test]
fn test_multi_output() {
    let project = Project::new();
    project.write("greet.proto", GREET_PROTO).write(
        "multi.mpconf",
        "\
load(\"greet.proto\", \"Hello\")

def main():
    return {
        \"a\": Hello(name = \"x\"),
        \"b\": Hello(name = \"y\"),
    }
",
    );

    let written = project.compile("multi.mpconf").unwrap();
    assert_eq!(written.len(), 2);
    assert!(written[0].ends_with("materialized_config/multi/a.materialized_JSON"));
    assert!(written[1].ends_with("materialized_config/multi/b.materialized_JSON"));

    let a: serde_json::Value =
        serde_json::from_str(&project.output("multi/a.materialized_JSON")).unwrap();
    assert_eq!(a["value"]["name"], "x");
    let b: serde_json::Value =
        serde_json::from_str(&project.output("multi/b.materialized_JSON")).unwrap();
    assert_eq!(b["value"]["name"], "y");
}

// === Scenario 3: cycle rejection ===

#[test]
fn test_import_cycle() {
    let project = Project::new();
    project
        .write(
            "a.pconf",
            "load(\"b.pconf\", \"bee\")\n\ndef main():\n    return bee\n",
        )
        .write("b.pconf", "load(\"a.pconf\", \"main\")\n\nbee = 1\n");

    let err = project.compile("a.pconf").unwrap_err();
    match err.root() {
        CompileError::ImportCycle { path } => {
            assert!(path.ends_with("a.pconf"), "cycle names the entry: {path:?}");
        }
        other => panic!("expected ImportCycle, got: {other}"),
    }
}

// === Scenario 4: validator reject ===

#[test]
fn test_validator_rejects_message() {
    let project = Project::new();
    project
        .write("greet.proto", GREET_PROTO)
        .write(
            "greet.proto-validator",
            "\
load(\"greet.proto\", \"Hello\")

def check_hello(msg):
    if msg.name == \"\":
        fail(\"name required\")

add_validator(Hello, check_hello)
",
        )
        .write(
            "empty.pconf",
            "\
load(\"greet.proto\", \"Hello\")

def main():
    return Hello(name = \"\")
",
        );

    let err = project.compile("empty.pconf").unwrap_err();
    match err.root() {
        CompileError::ValidationFailed { type_name, error } => {
            assert_eq!(type_name, "Hello");
            assert_eq!(error.message, "name required");
            assert!(!error.frames.is_empty(), "backtrace must not be empty");
        }
        other => panic!("expected ValidationFailed, got: {other}"),
    }
    assert!(!project
        .root()
        .join("materialized_config/empty.materialized_JSON")
        .exists());
}

#[test]
fn test_validator_accepts_message() {
    let project = Project::new();
    project
        .write("greet.proto", GREET_PROTO)
        .write(
            "greet.proto-validator",
            "\
load(\"greet.proto\", \"Hello\")

def check_hello(msg):
    if msg.name == \"\":
        fail(\"name required\")

add_validator(Hello, check_hello)
",
        )
        .write(
            "hi.pconf",
            "\
load(\"greet.proto\", \"Hello\")

def main():
    return Hello(name = \"ok\")
",
        );

    project.compile("hi.pconf").unwrap();
}

// === Scenario 5: unknown field ===

#[test]
fn test_unknown_field() {
    let project = Project::new();
    project.write("greet.proto", GREET_PROTO).write(
        "bad.pconf",
        "\
load(\"greet.proto\", \"Hello\")

def main():
    return Hello(nameX = \"x\")
",
    );

    let err = project.compile("bad.pconf").unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("unknown field `nameX`"), "got: {rendered}");
}

// === Scenario 6: wrong return type ===

#[test]
fn test_bad_main_return() {
    let project = Project::new();
    project.write(
        "bad.pconf",
        "def main():\n    return \"ok\"\n",
    );

    let err = project.compile("bad.pconf").unwrap_err();
    assert!(matches!(err.root(), CompileError::BadMainReturn { .. }));
}

#[test]
fn test_multi_requires_string_keys() {
    let project = Project::new();
    project.write("greet.proto", GREET_PROTO).write(
        "multi.mpconf",
        "\
load(\"greet.proto\", \"Hello\")

def main():
    return {1: Hello(name = \"x\")}
",
    );
    let err = project.compile("multi.mpconf").unwrap_err();
    assert!(matches!(err.root(), CompileError::BadMainReturn { .. }));
}

// === Entry point contract ===

#[test]
fn test_missing_main() {
    let project = Project::new();
    project.write("empty.pconf", "x = 1\n");
    let err = project.compile("empty.pconf").unwrap_err();
    assert!(matches!(err.root(), CompileError::MissingMain { .. }));
}

#[test]
fn test_main_not_callable() {
    let project = Project::new();
    project.write("bad.pconf", "main = 42\n");
    let err = project.compile("bad.pconf").unwrap_err();
    assert!(matches!(err.root(), CompileError::MainNotCallable { .. }));
}

#[test]
fn test_unclassifiable_input() {
    let project = Project::new();
    project.write("conf.txt", "def main():\n    pass\n");
    let err = project.compile("conf.txt").unwrap_err();
    assert!(matches!(
        err.root(),
        CompileError::InputClassification(_)
    ));
}

// === Determinism ===

#[test]
fn test_determinism() {
    let source = "\
load(\"greet.proto\", \"Hello\")

def main():
    names = [\"c\", \"a\", \"b\"]
    return {n: Hello(name = n) for n in sorted(names)}
";
    let first = {
        let project = Project::new();
        project.write("greet.proto", GREET_PROTO).write("multi.mpconf", source);
        project.compile("multi.mpconf").unwrap();
        (
            project.output("multi/a.materialized_JSON"),
            project.output("multi/b.materialized_JSON"),
            project.output("multi/c.materialized_JSON"),
        )
    };
    let second = {
        let project = Project::new();
        project.write("greet.proto", GREET_PROTO).write("multi.mpconf", source);
        project.compile("multi.mpconf").unwrap();
        (
            project.output("multi/a.materialized_JSON"),
            project.output("multi/b.materialized_JSON"),
            project.output("multi/c.materialized_JSON"),
        )
    };
    assert_eq!(first, second);
}

// === Round-trip ===

#[test]
fn test_output_round_trips_through_schemas() {
    let project = Project::new();
    project.write("greet.proto", GREET_PROTO).write(
        "hi.pconf",
        "\
load(\"greet.proto\", \"Hello\")

def main():
    return Hello(name = \"world\")
",
    );
    project.compile("hi.pconf").unwrap();

    // Rebuild an equivalent registry and deserialize the emitted file
    // back through the envelope and payload schemas.
    let mut registry = TypeRegistry::new();
    register_envelope(&mut registry).unwrap();
    let raw = parser::parse_file(GREET_PROTO, "greet.proto").unwrap();
    registry.ingest_file(&raw, "greet.proto").unwrap();

    let text = project.output("hi.materialized_JSON");
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    let envelope = json::from_json(
        registry.message(ENVELOPE_TYPE).unwrap(),
        &registry,
        &parsed,
    )
    .unwrap();

    let mut expected_payload =
        DynamicMessage::new(registry.message("Hello").unwrap());
    expected_payload
        .set_field("name", FieldValue::String("world".to_string()))
        .unwrap();
    let expected =
        forma_compiler::emit::build_envelope(&expected_payload, &registry).unwrap();
    assert_eq!(envelope, expected);
}

// === Validator registration protocol ===

#[test]
fn test_add_validator_out_of_phase() {
    let project = Project::new();
    project.write("greet.proto", GREET_PROTO).write(
        "sneaky.pconf",
        "\
load(\"greet.proto\", \"Hello\")

def nop(msg):
    pass

add_validator(Hello, nop)

def main():
    return Hello(name = \"x\")
",
    );
    let err = project.compile("sneaky.pconf").unwrap_err();
    assert!(matches!(err.root(), CompileError::ValidatorOutOfPhase));
}

#[test]
fn test_duplicate_validator() {
    let project = Project::new();
    project
        .write("greet.proto", GREET_PROTO)
        .write(
            "greet.proto-validator",
            "\
load(\"greet.proto\", \"Hello\")

def first(msg):
    pass

def second(msg):
    pass

add_validator(Hello, first)
add_validator(Hello, second)
",
        )
        .write(
            "hi.pconf",
            "load(\"greet.proto\", \"Hello\")\n\ndef main():\n    return Hello(name = \"x\")\n",
        );
    let err = project.compile("hi.pconf").unwrap_err();
    assert!(matches!(
        err.root(),
        CompileError::DuplicateValidator { .. }
    ));
}

#[test]
fn test_validator_arity_mismatch() {
    let project = Project::new();
    project
        .write("greet.proto", GREET_PROTO)
        .write(
            "greet.proto-validator",
            "\
load(\"greet.proto\", \"Hello\")

def wrong(msg, extra):
    pass

add_validator(Hello, wrong)
",
        )
        .write(
            "hi.pconf",
            "load(\"greet.proto\", \"Hello\")\n\ndef main():\n    return Hello(name = \"x\")\n",
        );
    let err = project.compile("hi.pconf").unwrap_err();
    assert!(matches!(err.root(), CompileError::ArityMismatch { .. }));
}

#[test]
fn test_validator_is_directory() {
    let project = Project::new();
    project.write("greet.proto", GREET_PROTO).write(
        "hi.pconf",
        "load(\"greet.proto\", \"Hello\")\n\ndef main():\n    return Hello(name = \"x\")\n",
    );
    fs::create_dir_all(project.root().join("src/greet.proto-validator")).unwrap();
    let err = project.compile("hi.pconf").unwrap_err();
    assert!(matches!(
        err.root(),
        CompileError::ValidatorIsDirectory { .. }
    ));
}

// === Validation totality ===

#[test]
fn test_nested_messages_are_validated() {
    let project = Project::new();
    project
        .write(
            "tree.proto",
            "\
syntax = \"proto3\";

message Leaf {
    string label = 1;
}

message Branch {
    Leaf left = 1;
    repeated Leaf others = 2;
    map<string, Leaf> named = 3;
}
",
        )
        .write(
            "tree.proto-validator",
            "\
load(\"tree.proto\", \"Leaf\")

def check_leaf(leaf):
    if leaf.label == \"bad\":
        fail(\"bad leaf\")

add_validator(Leaf, check_leaf)
",
        );

    for body in [
        "Branch(left = Leaf(label = \"bad\"))",
        "Branch(others = [Leaf(label = \"ok\"), Leaf(label = \"bad\")])",
        "Branch(named = {\"k\": Leaf(label = \"bad\")})",
    ] {
        let source = format!(
            "load(\"tree.proto\", \"Branch\", \"Leaf\")\n\ndef main():\n    return {body}\n"
        );
        project.write("cfg.pconf", &source);
        let err = project.compile("cfg.pconf").unwrap_err();
        match err.root() {
            CompileError::ValidationFailed { type_name, error } => {
                assert_eq!(type_name, "Leaf");
                assert_eq!(error.message, "bad leaf");
            }
            other => panic!("expected ValidationFailed for {body}, got: {other}"),
        }
    }
}

#[test]
fn test_multi_validates_all_before_writing_any() {
    let project = Project::new();
    project
        .write("greet.proto", GREET_PROTO)
        .write(
            "greet.proto-validator",
            "\
load(\"greet.proto\", \"Hello\")

def check_hello(msg):
    if msg.name == \"\":
        fail(\"name required\")

add_validator(Hello, check_hello)
",
        )
        .write(
            "multi.mpconf",
            "\
load(\"greet.proto\", \"Hello\")

def main():
    return {
        \"good\": Hello(name = \"x\"),
        \"bad\": Hello(name = \"\"),
    }
",
        );

    project.compile("multi.mpconf").unwrap_err();
    // Nothing is written, not even the valid entry that sorts first.
    assert!(!project.root().join("materialized_config/multi").exists());
}

// === Sandbox ===

#[test]
fn test_load_cannot_escape_source_root() {
    let project = Project::new();
    fs::write(project.root().join("outside.pconf"), "x = 1\n").unwrap();
    project.write(
        "sneaky.pconf",
        "load(\"../outside.pconf\", \"x\")\n\ndef main():\n    return x\n",
    );
    let err = project.compile("sneaky.pconf").unwrap_err();
    assert!(matches!(
        err.root(),
        CompileError::UnresolvedImport { .. }
    ));
}

// === Module reuse and structure ===

#[test]
fn test_shared_library_module() {
    let project = Project::new();
    project
        .write("greet.proto", GREET_PROTO)
        .write(
            "lib/names.pconf",
            "\
def decorated(name):
    return \"[\" + name + \"]\"
",
        )
        .write(
            "hi.pconf",
            "\
load(\"greet.proto\", \"Hello\")
load(\"/lib/names.pconf\", \"decorated\")

def main():
    return Hello(name = decorated(\"world\"))
",
        );

    project.compile("hi.pconf").unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&project.output("hi.materialized_JSON")).unwrap();
    assert_eq!(parsed["value"]["name"], "[world]");
}

#[test]
fn test_rich_field_kinds() {
    let project = Project::new();
    project
        .write(
            "service.proto",
            "\
syntax = \"proto3\";

message Service {
    enum Tier { FREE = 0; PAID = 1; }
    message Endpoint {
        string host = 1;
        uint32 port = 2;
    }
    string name = 1;
    Tier tier = 2;
    repeated string regions = 3;
    map<string, int64> quotas = 4;
    Endpoint endpoint = 5;
    int64 budget = 6;
}
",
        )
        .write(
            "svc.pconf",
            "\
load(\"service.proto\", \"Service\")

def main():
    svc = Service(name = \"search\", tier = \"PAID\")
    svc.regions = [\"eu\", \"us\"]
    svc.regions.append(\"ap\")
    svc.quotas = {\"qps\": 1000}
    svc.quotas[\"storage\"] = 5000000000
    svc.endpoint = Service.Endpoint(host = \"search.local\", port = 8080)
    svc.budget = 9000000000
    return svc
",
        );

    project.compile("svc.pconf").unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&project.output("svc.materialized_JSON")).unwrap();
    let value = &parsed["value"];
    assert_eq!(value["name"], "search");
    assert_eq!(value["tier"], "PAID");
    assert_eq!(
        value["regions"],
        serde_json::json!(["eu", "us", "ap"])
    );
    assert_eq!(value["quotas"]["qps"], "1000");
    assert_eq!(value["quotas"]["storage"], "5000000000");
    assert_eq!(value["endpoint"]["host"], "search.local");
    assert_eq!(value["endpoint"]["port"], 8080);
    assert_eq!(value["budget"], "9000000000");
}

#[test]
fn test_auto_vivified_nested_construction() {
    let project = Project::new();
    project
        .write(
            "service.proto",
            "\
syntax = \"proto3\";

message Service {
    message Endpoint {
        string host = 1;
        uint32 port = 2;
    }
    Endpoint endpoint = 1;
    repeated string regions = 2;
}
",
        )
        .write(
            "svc.pconf",
            "\
load(\"service.proto\", \"Service\")

def main():
    svc = Service()
    svc.endpoint.host = \"a.local\"
    svc.endpoint.port = 9
    svc.regions.append(\"eu\")
    return svc
",
        );

    project.compile("svc.pconf").unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&project.output("svc.materialized_JSON")).unwrap();
    assert_eq!(parsed["value"]["endpoint"]["host"], "a.local");
    assert_eq!(parsed["value"]["endpoint"]["port"], 9);
    assert_eq!(parsed["value"]["regions"], serde_json::json!(["eu"]));
}

#[test]
fn test_type_mismatch_on_assignment() {
    let project = Project::new();
    project.write("greet.proto", GREET_PROTO).write(
        "bad.pconf",
        "\
load(\"greet.proto\", \"Hello\")

def main():
    return Hello(name = 42)
",
    );
    let err = project.compile("bad.pconf").unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("type mismatch"), "got: {rendered}");
}

#[test]
fn test_fail_fast_stops_before_write() {
    // A failing script writes no partial output.
    let project = Project::new();
    project.write("greet.proto", GREET_PROTO).write(
        "boom.pconf",
        "\
load(\"greet.proto\", \"Hello\")

def main():
    fail(\"nope\")
",
    );
    project.compile("boom.pconf").unwrap_err();
    assert!(!project
        .root()
        .join("materialized_config/boom.materialized_JSON")
        .exists());
}
