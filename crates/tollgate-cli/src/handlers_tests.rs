//! Tests for the command handlers.

#[cfg(test)]
mod tests {
    use crate::commands::EventArgs;
    use crate::config::{CliConfig, OutputFormat};
    use crate::handlers::{self, RunOptions};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn starter_workflow() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tollgate.yaml");
        handlers::init(path.to_str().unwrap()).unwrap();
        (dir, path)
    }

    fn push(branch: &str) -> EventArgs {
        EventArgs {
            event: Some("push".to_string()),
            branch: Some(branch.to_string()),
            base_ref: None,
        }
    }

    async fn rehearse(path: &PathBuf, event: &EventArgs, gate: Option<&str>, fail: &[String]) -> i32 {
        let options = RunOptions {
            path: path.to_str(),
            event,
            gate,
            dry_run: true,
            fail,
            output: Some(OutputFormat::Json),
        };
        handlers::run(&CliConfig::default(), options).await.unwrap()
    }

    #[test]
    fn test_init_writes_a_valid_workflow() {
        let (_dir, path) = starter_workflow();
        handlers::validate(path.to_str()).unwrap();
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tollgate.yaml");
        std::fs::write(&path, "name: mine\njobs: []\n").unwrap();

        handlers::init(path.to_str().unwrap()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "name: mine\njobs: []\n");
    }

    #[test]
    fn test_validate_reports_cycles_as_build_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tollgate.yaml");
        std::fs::write(
            &path,
            "name: loop\njobs:\n  - name: a\n    needs: [b]\n  - name: b\n    needs: [a]\n",
        )
        .unwrap();

        let err = handlers::validate(path.to_str()).unwrap_err();
        assert_eq!(crate::exit_code(&err), 2);
    }

    #[test]
    fn test_unparsable_workflow_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tollgate.yaml");
        std::fs::write(&path, "jobs: {").unwrap();

        let err = handlers::validate(path.to_str()).unwrap_err();
        assert_eq!(crate::exit_code(&err), 2);
    }

    #[test]
    fn test_plan_renders_every_format() {
        let (_dir, path) = starter_workflow();
        for format in [OutputFormat::Table, OutputFormat::Json, OutputFormat::Yaml] {
            handlers::plan(&CliConfig::default(), path.to_str(), &push("main"), Some(format)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_dry_run_exit_codes() {
        let (_dir, path) = starter_workflow();

        assert_eq!(rehearse(&path, &push("main"), None, &[]).await, 0);
        assert_eq!(rehearse(&path, &push("main"), None, &["test[2]".to_string()]).await, 1);

        // the failure gate reports success when something failed, which is
        // exit code 0 for that gate alone
        let failing = vec!["lint".to_string()];
        assert_eq!(rehearse(&path, &push("main"), Some("success"), &failing).await, 1);
        assert_eq!(rehearse(&path, &push("main"), Some("failure"), &failing).await, 0);

        // not applicable
        assert_eq!(rehearse(&path, &push("topic"), None, &failing).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_gate_is_rejected() {
        let (_dir, path) = starter_workflow();
        let options = RunOptions {
            path: path.to_str(),
            event: &push("main"),
            gate: Some("deploy"),
            dry_run: true,
            fail: &[],
            output: Some(OutputFormat::Json),
        };

        let err = handlers::run(&CliConfig::default(), options).await.unwrap_err();
        assert!(err.to_string().contains("no gate named 'deploy'"));
        assert_eq!(crate::exit_code(&err), 1);
    }

    #[test]
    fn test_schema_prints() {
        handlers::schema().unwrap();
    }
}
