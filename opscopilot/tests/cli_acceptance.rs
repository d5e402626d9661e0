use opscopilot_core::{Database, StreamChunk};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Env vars that would leak real provider configuration into the sandbox.
const PROVIDER_ENV: &[&str] = &[
    "AI_PROVIDER",
    "AI_CACHE_TTL_MS",
    "OPENAI_API_KEY",
    "OPENAI_MODEL",
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_MODEL",
    "GEMINI_API_KEY",
    "GEMINI_MODEL",
];

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("opscopilot/data.db")
    }

    fn open_db(&self) -> Database {
        let db = Database::open(&self.db_path()).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        db
    }
}

fn run_summarize(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("opscopilot-summarize"));
    let mut command = Command::new(bin_path);
    command
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state);
    for var in PROVIDER_ENV {
        command.env_remove(var);
    }
    command
        .output()
        .unwrap_or_else(|e| panic!("failed to execute opscopilot-summarize: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }
    panic!(
        "opscopilot-summarize {} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn ad_hoc_summary_renders_text() {
    let env = CliTestEnv::new();
    let args = [
        "--title",
        "Feature request: dark mode",
        "--description",
        "Users have requested a dark mode option for the dashboard.",
    ];

    let output = run_summarize(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Risk: low"), "unexpected output:\n{stdout}");
    assert!(stdout.contains("Categories: feature"));
    assert!(stdout.contains("Next steps:"));
}

#[test]
fn ticket_summary_streams_sse_then_hits_cache() {
    let env = CliTestEnv::new();
    let ticket = env
        .open_db()
        .create_ticket(
            "Critical bug in authentication",
            "Users are unable to log in after the latest deploy.",
        )
        .expect("failed to seed ticket");

    let args = ["--ticket", ticket.id.as_str(), "--format", "sse"];
    let output = run_summarize(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let chunks: Vec<StreamChunk> = stdout
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|json| serde_json::from_str(json).expect("frame is a stream chunk"))
        .collect();
    let Some(StreamChunk::Done { result }) = chunks.last() else {
        panic!("expected a done frame, got:\n{stdout}");
    };
    assert!(result.categories.contains(&"bug".to_string()));

    let entry = env
        .open_db()
        .cache_entry(&ticket.id)
        .expect("failed to read cache")
        .expect("summary should be cached");
    assert_eq!(&entry.result, result);

    let args = ["--ticket", ticket.id.as_str()];
    let output = run_summarize(&env, &args);
    assert_success(&args, &output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("(cached)"), "unexpected output:\n{stdout}");
    assert!(stdout.contains("Risk: high"));
}

#[test]
fn unknown_ticket_and_unconfigured_provider_fail() {
    let env = CliTestEnv::new();

    let output = run_summarize(&env, &["--ticket", "does-not-exist"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ticket not found"), "unexpected stderr:\n{stderr}");

    let output = run_summarize(
        &env,
        &[
            "--title",
            "Broken login",
            "--description",
            "Nobody can sign in today.",
            "--provider",
            "openai",
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("OpenAI API key is not configured"),
        "unexpected stderr:\n{stderr}"
    );
}
