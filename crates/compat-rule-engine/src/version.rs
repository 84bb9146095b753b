//! 版本约束匹配
//!
//! 按 npm semver 的范围语法解析表达式（`^`、`~`、比较器、x-range、连字符范围、`||`），
//! 转换为 `semver::VersionReq` 后完成匹配。纯函数，无共享状态。

use crate::error::{Result, RuleError};
use semver::{Version, VersionReq};

/// 判断版本是否满足范围，任何解析失败都视为不满足
pub fn satisfies(version: &str, range: &str) -> bool {
    satisfies_strict(version, range).unwrap_or(false)
}

/// 严格模式：版本或范围解析失败时返回 `ParseError`
pub fn satisfies_strict(version: &str, range: &str) -> Result<bool> {
    let version = parse_version(version)?;
    let range = VersionRange::parse(range)?;
    Ok(range.matches(&version))
}

/// 解析版本号，容忍前导的 `=` 和 `v`
pub fn parse_version(input: &str) -> Result<Version> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('=').unwrap_or(trimmed).trim_start();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    Version::parse(trimmed)
        .map_err(|e| RuleError::ParseError(format!("无效的版本 '{}': {}", input, e)))
}

/// 版本匹配器
///
/// `strict` 决定解析失败时是返回 `false` 还是返回错误。
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionMatcher {
    strict: bool,
}

impl VersionMatcher {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn matches(&self, version: &str, range: &str) -> Result<bool> {
        if self.strict {
            satisfies_strict(version, range)
        } else {
            Ok(satisfies(version, range))
        }
    }
}

/// 由 `||` 连接的比较器集合，任一集合满足即匹配
#[derive(Debug, Clone)]
pub struct VersionRange {
    sets: Vec<VersionReq>,
}

impl VersionRange {
    pub fn parse(input: &str) -> Result<Self> {
        let sets = input
            .split("||")
            .map(|part| {
                let normalized = normalize_comparator_set(part.trim());
                VersionReq::parse(&normalized).map_err(|e| {
                    RuleError::ParseError(format!("无效的版本范围 '{}': {}", input, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { sets })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.sets.iter().any(|req| req.matches(version))
    }
}

/// 把 npm 风格的比较器集合改写为 `semver` crate 的语法
///
/// - 空格分隔的比较器改为逗号分隔
/// - 裸版本号表示精确匹配（`1.2.3` -> `=1.2.3`，`1.2` -> `=1.2`）
/// - `1.2.3 - 2.3.4` 改写为 `>=1.2.3, <=2.3.4`
fn normalize_comparator_set(set: &str) -> String {
    if set.is_empty() {
        return "*".to_string();
    }

    if let Some((low, high)) = set.split_once(" - ") {
        return format!(">={}, <={}", low.trim(), high.trim());
    }

    let mut comparators = Vec::new();
    let mut pending_op = String::new();

    for token in set.split_whitespace() {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }

        let token = format!("{}{}", pending_op, token);
        pending_op.clear();
        comparators.push(normalize_comparator(&token));
    }

    if !pending_op.is_empty() {
        // 悬空的操作符交给 semver 报错
        comparators.push(pending_op);
    }

    comparators.join(", ")
}

fn normalize_comparator(token: &str) -> String {
    let op_len = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(op_len);
    let version = version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version);

    let is_wildcard = |part: &str| matches!(part, "x" | "X" | "*");

    if version.split('.').any(is_wildcard) {
        let fixed: Vec<&str> = version.split('.').take_while(|p| !is_wildcard(p)).collect();
        if fixed.is_empty() {
            return "*".to_string();
        }
        // `semver` 不接受操作符后跟通配符：带操作符时改用部分版本号
        // （`^1.2.x` -> `^1.2`，`>=1.x` -> `>=1`），裸通配符保持 `1.2.*`
        return match op {
            "" | "=" => format!("{}.*", fixed.join(".")),
            _ => format!("{}{}", op, fixed.join(".")),
        };
    }

    if op.is_empty() {
        format!("={}", version)
    } else {
        format!("{}{}", op, version)
    }
}
