//! 규칙 파일 로더 -- YAML 규칙 파일을 디스크에서 로드합니다.
//!
//! 규칙 디렉토리 내의 `.yml`/`.yaml` 파일을 경로 순으로 스캔하고 파싱합니다.
//! 파일 하나에 규칙 하나(매핑) 또는 여러 개(시퀀스)를 담을 수 있습니다.
//! 규칙 오류는 치명적 설정 에러이므로 파싱에 실패한 파일이 있으면 전체 로딩이
//! 실패합니다.

use std::path::{Path, PathBuf};

use natlog_core::config::RuleConfig;
use serde::Deserialize;

use crate::error::NatlogPipelineError;

/// 규칙 파일 로더 설정
const MAX_RULE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_RULES_COUNT: usize = 10_000;

/// 규칙 파일 내용 (단일 규칙 또는 규칙 목록)
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Many(Vec<RuleConfig>),
    One(RuleConfig),
}

/// 규칙 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// 디렉토리에서 모든 YAML 규칙 파일을 로드합니다.
    ///
    /// `.yml` 또는 `.yaml` 확장자를 가진 파일만 처리합니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - 파일 하나라도 파싱에 실패한 경우
    /// - 규칙 수가 `MAX_RULES_COUNT`를 초과하는 경우
    pub async fn load_directory(
        dir: impl AsRef<Path>,
    ) -> Result<Vec<RuleConfig>, NatlogPipelineError> {
        let dir = dir.as_ref();

        let mut entries =
            tokio::fs::read_dir(dir)
                .await
                .map_err(|e| NatlogPipelineError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("failed to read directory: {e}"),
                })?;

        let mut paths: Vec<PathBuf> = Vec::new();
        while let Some(entry) =
            entries
                .next_entry()
                .await
                .map_err(|e| NatlogPipelineError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("failed to read directory entry: {e}"),
                })?
        {
            let path = entry.path();

            // .yml / .yaml 확장자만 처리
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");

            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut rules = Vec::new();
        for path in &paths {
            rules.extend(Self::load_file(path).await?);

            if rules.len() > MAX_RULES_COUNT {
                return Err(NatlogPipelineError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("too many rules: max {MAX_RULES_COUNT}"),
                });
            }
        }

        tracing::info!(
            dir = %dir.display(),
            files = paths.len(),
            count = rules.len(),
            "loaded extraction rules"
        );

        Ok(rules)
    }

    /// 단일 YAML 파일에서 규칙을 로드합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Vec<RuleConfig>, NatlogPipelineError> {
        let path = path.as_ref();

        // 파일 크기 검증
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| NatlogPipelineError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(NatlogPipelineError::RuleLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| NatlogPipelineError::RuleLoad {
                    path: path.display().to_string(),
                    reason: format!("failed to read file: {e}"),
                })?;

        Self::parse_yaml(&content, &path.display().to_string())
    }

    /// YAML 문자열을 파싱하여 규칙을 생성합니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<Vec<RuleConfig>, NatlogPipelineError> {
        let file: RuleFile =
            serde_yaml::from_str(yaml_str).map_err(|e| NatlogPipelineError::RuleLoad {
                path: source.to_owned(),
                reason: format!("YAML parse error: {e}"),
            })?;

        Ok(match file {
            RuleFile::Many(rules) => rules,
            RuleFile::One(rule) => vec![rule],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE: &str = r#"
name: pba
table: natlog.port_blocks
pattern: 'PBA (ALLOC|RELEASE) (\S+)'
fields:
  - name: action
    type: list
    values:
      ALLOC: 1
      RELEASE: 2
    default: 0
  - name: subscriber_ip
    type: ip2int
"#;

    #[test]
    fn parse_single_rule() {
        let rules = RuleLoader::parse_yaml(SINGLE, "pba.yml").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "pba");
        assert_eq!(rules[0].fields[0].kind, "list");
        assert_eq!(
            rules[0].fields[0].values,
            Some(serde_json::json!({"ALLOC": 1, "RELEASE": 2}))
        );
        assert_eq!(rules[0].fields[0].default, Some(serde_json::json!(0)));
    }

    #[test]
    fn parse_rule_list() {
        let yaml = r#"
- name: a
  table: t1
  pattern: '(\d+)'
  fields: [{ name: n, type: int16 }]
- name: b
  table: t2
  pattern: '(\w+)'
  fields: [{ name: w, type: string }]
"#;
        let rules = RuleLoader::parse_yaml(yaml, "multi.yaml").unwrap();
        let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn parse_invalid_yaml_returns_error() {
        let result = RuleLoader::parse_yaml("not: [valid: yaml: {{{", "bad.yml");
        assert!(matches!(result, Err(NatlogPipelineError::RuleLoad { .. })));
    }

    #[tokio::test]
    async fn load_nonexistent_directory_returns_error() {
        let result = RuleLoader::load_directory("/nonexistent/path/rules").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn load_directory_in_path_order_ignoring_other_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("20-pba.yml"), SINGLE)
            .await
            .unwrap();
        tokio::fs::write(
            dir.path().join("10-first.yaml"),
            "name: first\ntable: t\npattern: '(x)'\nfields: [{ name: x, type: string }]\n",
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("README.txt"), "ignored")
            .await
            .unwrap();

        let rules = RuleLoader::load_directory(dir.path()).await.unwrap();
        let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "pba"]);
    }

    #[tokio::test]
    async fn load_directory_fails_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bad.yml"), "name: [")
            .await
            .unwrap();
        assert!(RuleLoader::load_directory(dir.path()).await.is_err());
    }
}
