//! 事实值路径提取
//!
//! 支持 `$`、`.field`、`[index]`、`['key']` 组成的访问路径，`$` 前缀可省略
//! （`version` 与 `$.version` 等价）。字段缺失时返回 `None`，从不报错。

use crate::error::{Result, RuleError};
use serde_json::Value;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// 编译后的路径表达式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FactPath {
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| RuleError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = path.trim();
        let mut segments = Vec::new();
        let mut chars = trimmed.chars().peekable();

        match chars.peek() {
            None => return Err(invalid("路径为空")),
            Some(&'$') => {
                chars.next();
            }
            Some(&'.') | Some(&'[') => {}
            Some(_) => segments.push(Segment::Key(read_key(&mut chars))),
        }

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let key = read_key(&mut chars);
                    if key.is_empty() {
                        return Err(invalid("字段名不能为空"));
                    }
                    segments.push(Segment::Key(key));
                }
                '[' => segments.push(read_bracket(&mut chars).map_err(|r| invalid(r))?),
                _ => return Err(invalid("意外的字符")),
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// 路径是否只指向根节点（`$`）
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// 提取子字段，任何一级缺失都返回 `None`
    pub fn extract<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;

        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                // 兼容 `items.0.name` 写法
                (Segment::Key(key), Value::Array(arr)) => arr.get(key.parse::<usize>().ok()?)?,
                (Segment::Index(i), Value::Array(arr)) => arr.get(*i)?,
                _ => return None,
            };
        }

        Some(current)
    }
}

impl fmt::Display for FactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn read_key(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut key = String::new();
    while let Some(&c) = chars.peek() {
        if c == '.' || c == '[' {
            break;
        }
        key.push(c);
        chars.next();
    }
    key
}

fn read_bracket(chars: &mut Peekable<Chars<'_>>) -> std::result::Result<Segment, &'static str> {
    let segment = match chars.peek() {
        Some(&quote @ ('\'' | '"')) => {
            chars.next();
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some(c) if c == quote => break,
                    Some(c) => key.push(c),
                    None => return Err("引号未闭合"),
                }
            }
            Segment::Key(key)
        }
        _ => {
            let mut digits = String::new();
            while let Some(&c) = chars.peek() {
                if c == ']' {
                    break;
                }
                digits.push(c);
                chars.next();
            }
            Segment::Index(digits.trim().parse().map_err(|_| "数组下标必须是非负整数")?)
        }
    };

    match chars.next() {
        Some(']') => Ok(segment),
        _ => Err("缺少 ']'"),
    }
}
