use std::time::{Duration, Instant};
use tabsh::{App, Config, InputOp};
use tempfile::TempDir;

fn app_in(dir: &TempDir) -> App {
    let config = Config {
        history_file: Some(dir.path().join("history")),
        ..Config::default()
    };
    App::with_base(config, dir.path().to_path_buf()).unwrap()
}

fn submit(app: &mut App, line: &str) {
    app.apply(InputOp::InsertText(line.to_string()));
    app.apply(InputOp::SubmitLine);
}

fn drain_until_idle(app: &mut App) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while app.active_session().job.is_some() {
        app.poll_io().unwrap();
        assert!(Instant::now() < deadline, "job never finished");
    }
}

fn texts(app: &App) -> Vec<String> {
    app.active_session()
        .scrollback
        .iter()
        .map(|l| l.text.clone())
        .collect()
}

#[test]
fn test_end_to_end_pipeline_with_redirection() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(&dir);

    std::fs::write(dir.path().join("words.txt"), "cherry\napple\nbanana\n").unwrap();
    submit(&mut app, "sort < words.txt > sorted.txt");
    drain_until_idle(&mut app);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = std::fs::read_to_string(dir.path().join("sorted.txt")) {
            if content == "apple\nbanana\ncherry\n" {
                break;
            }
        }
        assert!(Instant::now() < deadline, "sorted.txt never written");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_pipeline_output_lands_in_scrollback() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(&dir);

    // The quoted '\n' becomes a literal newline in printf's argument
    submit(&mut app, "printf 'a\\nb' | cat");
    drain_until_idle(&mut app);

    let lines = texts(&app);
    assert!(lines.contains(&"a".to_string()), "got {:?}", lines);
    assert!(lines.contains(&"b".to_string()), "got {:?}", lines);
}

#[test]
fn test_builtins_round_trip() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    let mut app = app_in(&dir);

    submit(&mut app, "echo \"hello there\"");
    assert_eq!(texts(&app).last().unwrap(), "hello there");

    submit(&mut app, "cd nested");
    assert!(app.active_session().cwd.ends_with("nested"));

    submit(&mut app, "clear");
    assert_eq!(texts(&app), vec!["Tab 1"]);

    submit(&mut app, "history");
    // Most recent first, every submitted line recorded
    let lines = texts(&app);
    let n = lines.len();
    assert_eq!(lines[n - 3], "clear");
    assert_eq!(lines[n - 2], "cd nested");
    assert_eq!(lines[n - 1], "echo \"hello there\"");
}

#[test]
fn test_history_persists_across_instances() {
    let dir = TempDir::new().unwrap();
    {
        let mut app = app_in(&dir);
        submit(&mut app, "echo \"first run\"");
    }
    let mut app = app_in(&dir);
    submit(&mut app, "history");
    assert_eq!(texts(&app).last().unwrap(), "echo \"first run\"");
}

#[test]
fn test_tabs_are_independent() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("other")).unwrap();
    let mut app = app_in(&dir);

    submit(&mut app, "cd other");
    app.apply(InputOp::NewTab);

    // The new tab starts from the base directory, not the first tab's cwd
    assert!(app.active_session().cwd.ends_with("other") == false);
    assert_eq!(texts(&app), vec!["Tab 2"]);

    app.apply(InputOp::PrevTab);
    assert!(app.active_session().cwd.ends_with("other"));
}

#[test]
fn test_multiwatch_lifecycle() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(&dir);

    submit(&mut app, "multiwatch [\"echo tick\"]");
    assert!(app.active_session().watch.is_some());

    let deadline = Instant::now() + Duration::from_secs(5);
    while !texts(&app).iter().any(|l| l == "tick") {
        app.poll_io().unwrap();
        assert!(Instant::now() < deadline, "watch output never surfaced");
    }
    // Framed by a header naming the command and divider lines
    let lines = texts(&app);
    assert!(lines.iter().any(|l| l.starts_with("\"echo tick\" , ")));

    app.apply(InputOp::Interrupt);
    assert!(app.active_session().watch.is_none());
    assert_eq!(texts(&app).last().unwrap(), "^C - multiwatch stopped");
}

#[test]
fn test_exit_builtin_quits() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(&dir);
    submit(&mut app, "exit");
    assert!(app.should_quit());
}
