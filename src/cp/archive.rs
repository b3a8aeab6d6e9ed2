// ABOUTME: Plans and runs the tar pipeline behind cp, applying Docker's path policies.
// ABOUTME: One tar creates the archive, a second extracts it, joined by a pipe.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::CopyError;

/// Environment variable naming the tar binary.
pub const TAR_ENV: &str = "TAR";

/// Tar binary to run.
pub fn tar_program() -> String {
    std::env::var(TAR_ENV)
        .ok()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "tar".to_string())
}

/// What one endpoint of a copy looks like on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub host_path: PathBuf,
    pub exists: bool,
    pub is_dir: bool,
    /// Base name as the user sees it.
    pub name: String,
}

/// The two tar invocations for a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarPlan {
    /// Directory the archive is created from.
    pub create_dir: PathBuf,
    /// Single member archived from `create_dir`.
    pub create_member: String,
    /// Directory the archive is extracted into.
    pub extract_dir: PathBuf,
    /// Leading member name rewritten while archiving.
    pub rename: Option<(String, String)>,
}

fn asserts_dir(raw: &str) -> bool {
    raw.ends_with('/') || raw.ends_with("/.")
}

fn parent_of(info: &PathInfo) -> PathBuf {
    info.host_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn member_of(info: &PathInfo) -> String {
    info.host_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string())
}

fn renamed(member: &str, wanted: &str) -> Option<(String, String)> {
    (member != wanted && !wanted.is_empty()).then(|| (member.to_string(), wanted.to_string()))
}

/// Work out the tar invocations copying `src` to `dst`.
///
/// `src_raw` and `dst_raw` are the paths as typed; their trailing `/` or `/.`
/// carry meaning:
/// - `src/.` copies the contents of the directory `src`
/// - `dst/` requires `dst` to be an existing directory
/// - a directory never replaces an existing file
/// - a directory copied to a missing destination becomes that destination
pub fn plan_copy(
    src: &PathInfo,
    src_raw: &str,
    dst: &PathInfo,
    dst_raw: &str,
) -> Result<TarPlan, CopyError> {
    if !src.exists {
        return Err(CopyError::DoesNotExist(src_raw.to_string()));
    }
    let copy_contents = src_raw.ends_with("/.") || src_raw == ".";
    if copy_contents && !src.is_dir {
        return Err(CopyError::IsNotADir(src_raw.to_string()));
    }

    if dst.exists && dst.is_dir {
        if copy_contents {
            return Ok(TarPlan {
                create_dir: src.host_path.clone(),
                create_member: ".".to_string(),
                extract_dir: dst.host_path.clone(),
                rename: None,
            });
        }
        let member = member_of(src);
        return Ok(TarPlan {
            create_dir: parent_of(src),
            rename: renamed(&member, &src.name),
            create_member: member,
            extract_dir: dst.host_path.clone(),
        });
    }

    if dst.exists {
        if asserts_dir(dst_raw) {
            return Err(CopyError::IsNotADir(dst_raw.to_string()));
        }
        if src.is_dir {
            return Err(CopyError::DirectoryOverFile(dst_raw.to_string()));
        }
    } else if asserts_dir(dst_raw) {
        return Err(CopyError::DestinationDirMissing(dst_raw.to_string()));
    }

    let (create_dir, member) = if copy_contents {
        (src.host_path.clone(), ".".to_string())
    } else {
        (parent_of(src), member_of(src))
    };
    Ok(TarPlan {
        create_dir,
        rename: renamed(&member, &dst.name),
        create_member: member,
        extract_dir: parent_of(dst),
    })
}

fn escape_pattern(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '.' | '[' | ']' | '*' | '^' | '$' | '\\' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_replacement(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '&' | '\\' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// GNU tar `--transform` expression renaming the leading member. Symlink
/// targets are left alone.
fn transform_expression(from: &str, to: &str) -> String {
    format!("s|^{}|{}|S", escape_pattern(from), escape_replacement(to))
}

impl TarPlan {
    fn create_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            "-f".to_string(),
            "-".to_string(),
            "-C".to_string(),
            self.create_dir.display().to_string(),
        ];
        if let Some((from, to)) = &self.rename {
            args.push(format!("--transform={}", transform_expression(from, to)));
        }
        args.push("--".to_string());
        args.push(self.create_member.clone());
        args
    }

    fn extract_args(&self) -> Vec<String> {
        vec![
            "-x".to_string(),
            "-f".to_string(),
            "-".to_string(),
            "-C".to_string(),
            self.extract_dir.display().to_string(),
        ]
    }
}

fn command(prefix: &[String], tar: &str, args: Vec<String>) -> (Command, String) {
    let mut argv: Vec<String> = prefix.to_vec();
    argv.push(tar.to_string());
    argv.extend(args);
    let display = argv.join(" ");
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    (cmd, display)
}

fn tar_failure(command: &str, output: &std::process::Output) -> Option<CopyError> {
    (!output.status.success()).then(|| CopyError::Tar {
        command: command.to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Run `plan`, prefixing the creating and extracting tar with the given argv.
pub(super) async fn run_pipeline(
    plan: &TarPlan,
    create_prefix: &[String],
    extract_prefix: &[String],
) -> Result<(), CopyError> {
    let tar = tar_program();
    let (mut create, create_display) = command(create_prefix, &tar, plan.create_args());
    let (mut extract, extract_display) = command(extract_prefix, &tar, plan.extract_args());
    tracing::debug!("cp pipeline: {} | {}", create_display, extract_display);

    let mut creator = create
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CopyError::io(format!("failed to run {}", create_display), e))?;
    let pipe: Stdio = creator
        .stdout
        .take()
        .ok_or_else(|| {
            CopyError::io(
                "tar output unavailable",
                std::io::Error::from(std::io::ErrorKind::BrokenPipe),
            )
        })?
        .try_into()
        .map_err(|e| CopyError::io("failed to connect tar processes", e))?;
    let extractor = extract
        .stdin(pipe)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CopyError::io(format!("failed to run {}", extract_display), e))?;

    let (created, extracted) = tokio::join!(creator.wait_with_output(), extractor.wait_with_output());
    let created = created.map_err(|e| CopyError::io("failed to wait for tar", e))?;
    let extracted = extracted.map_err(|e| CopyError::io("failed to wait for tar", e))?;

    if let Some(e) = tar_failure(&create_display, &created) {
        return Err(e);
    }
    if let Some(e) = tar_failure(&extract_display, &extracted) {
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str, exists: bool, is_dir: bool) -> PathInfo {
        PathInfo {
            host_path: PathBuf::from(path),
            exists,
            is_dir,
            name: Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    #[test]
    fn file_into_existing_directory_keeps_its_name() {
        let plan = plan_copy(
            &info("/host/a.txt", true, false),
            "a.txt",
            &info("/root/tmp", true, true),
            "/tmp",
        )
        .unwrap();
        assert_eq!(plan.create_dir, PathBuf::from("/host"));
        assert_eq!(plan.create_member, "a.txt");
        assert_eq!(plan.extract_dir, PathBuf::from("/root/tmp"));
        assert_eq!(plan.rename, None);
    }

    #[test]
    fn file_to_new_name_is_renamed() {
        let plan = plan_copy(
            &info("/host/a.txt", true, false),
            "a.txt",
            &info("/root/tmp/b.txt", false, false),
            "/tmp/b.txt",
        )
        .unwrap();
        assert_eq!(plan.extract_dir, PathBuf::from("/root/tmp"));
        assert_eq!(plan.rename, Some(("a.txt".into(), "b.txt".into())));
    }

    #[test]
    fn dot_suffix_copies_directory_contents() {
        let plan = plan_copy(
            &info("/host/src", true, true),
            "src/.",
            &info("/root/dst", true, true),
            "/dst",
        )
        .unwrap();
        assert_eq!(plan.create_dir, PathBuf::from("/host/src"));
        assert_eq!(plan.create_member, ".");
        assert_eq!(plan.rename, None);

        assert!(matches!(
            plan_copy(
                &info("/host/file", true, false),
                "file/.",
                &info("/root/dst", true, true),
                "/dst"
            ),
            Err(CopyError::IsNotADir(_))
        ));
    }

    #[test]
    fn directory_to_missing_destination_becomes_it() {
        let plan = plan_copy(
            &info("/host/src", true, true),
            "src",
            &info("/root/new", false, false),
            "/new",
        )
        .unwrap();
        assert_eq!(plan.create_member, "src");
        assert_eq!(plan.extract_dir, PathBuf::from("/root"));
        assert_eq!(plan.rename, Some(("src".into(), "new".into())));
    }

    #[test]
    fn trailing_slash_requires_an_existing_directory() {
        assert!(matches!(
            plan_copy(
                &info("/host/a.txt", true, false),
                "a.txt",
                &info("/root/dst", false, false),
                "/dst/"
            ),
            Err(CopyError::DestinationDirMissing(_))
        ));
        assert!(matches!(
            plan_copy(
                &info("/host/a.txt", true, false),
                "a.txt",
                &info("/root/file", true, false),
                "/file/"
            ),
            Err(CopyError::IsNotADir(_))
        ));
    }

    #[test]
    fn directory_never_replaces_a_file() {
        assert!(matches!(
            plan_copy(
                &info("/host/src", true, true),
                "src",
                &info("/root/file", true, false),
                "/file"
            ),
            Err(CopyError::DirectoryOverFile(_))
        ));
    }

    #[test]
    fn missing_source_is_reported() {
        assert!(matches!(
            plan_copy(
                &info("/host/none", false, false),
                "none",
                &info("/root", true, true),
                "/"
            ),
            Err(CopyError::DoesNotExist(_))
        ));
    }

    #[test]
    fn transform_escapes_regex_characters() {
        assert_eq!(transform_expression(".", "new"), "s|^\\.|new|S");
        assert_eq!(transform_expression("a.b", "c&d"), "s|^a\\.b|c\\&d|S");
    }

    #[test]
    fn tar_binary_follows_environment() {
        temp_env::with_var(TAR_ENV, Some("gtar"), || assert_eq!(tar_program(), "gtar"));
        temp_env::with_var_unset(TAR_ENV, || assert_eq!(tar_program(), "tar"));
    }

    #[tokio::test]
    async fn pipeline_copies_directory_contents_to_new_directory() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("nested/file.txt"), "hello").unwrap();
        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("copy");

        let src_info = PathInfo {
            host_path: src.path().to_path_buf(),
            exists: true,
            is_dir: true,
            name: "src".into(),
        };
        let dst_info = PathInfo {
            host_path: target.clone(),
            exists: false,
            is_dir: false,
            name: "copy".into(),
        };
        let plan = plan_copy(&src_info, "src/.", &dst_info, "copy").unwrap();
        run_pipeline(&plan, &[], &[]).await.unwrap();

        let copied = std::fs::read_to_string(target.join("nested/file.txt")).unwrap();
        assert_eq!(copied, "hello");
    }
}
