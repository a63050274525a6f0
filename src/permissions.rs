// ABOUTME: Parser and model for the wildcard/class-block permissions DSL

use std::collections::{HashMap, HashSet};

/// Per-class member allow/deny rule: a `-Class{...}` block
/// denies the listed members (everything else allowed); a `+Class{...}`
/// block allows only the listed members (everything else denied); an
/// empty class name prefix (`ε`) behaves like `-` with an empty member
/// list, i.e. allow-all for that class.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassRule {
    DenyListed { methods: HashSet<String>, fields: HashSet<String> },
    AllowListed { methods: HashSet<String>, fields: HashSet<String> },
}

/// A resolved permission set: which packages are wildcard-allowed, and
/// per-class member rules, generalized from filesystem-glob allow-list
/// shapes to (class, member) pairs.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    wildcard_packages: Vec<String>,
    classes: HashMap<String, ClassRule>,
}

impl Permissions {
    /// The all-permissive default: no wildcard restriction, no class
    /// rules recorded, so `allow_*` all return true. A plain value built
    /// on demand rather than a mutable global singleton.
    pub fn unrestricted() -> Self {
        Permissions::default()
    }

    pub fn allow_class(&self, class_name: &str) -> bool {
        if self.wildcard_packages.is_empty() {
            return true;
        }
        self.wildcard_packages
            .iter()
            .any(|pkg| class_name.starts_with(pkg.as_str()))
    }

    /// Method names live in their own namespace from field names: a
    /// `danger();` entry in a class block denies only the method
    /// `danger`, never a field of the same name.
    pub fn allow_method(&self, class_name: &str, method: &str) -> bool {
        if !self.allow_class(class_name) {
            return false;
        }
        match self.classes.get(class_name) {
            None => true,
            Some(ClassRule::DenyListed { methods, .. }) => !methods.contains(method),
            Some(ClassRule::AllowListed { methods, .. }) => methods.contains(method),
        }
    }

    pub fn allow_field(&self, class_name: &str, field: &str) -> bool {
        if !self.allow_class(class_name) {
            return false;
        }
        match self.classes.get(class_name) {
            None => true,
            Some(ClassRule::DenyListed { fields, .. }) => !fields.contains(field),
            Some(ClassRule::AllowListed { fields, .. }) => fields.contains(field),
        }
    }

    /// `new(...)` construction is checked through the method namespace
    /// under the reserved member name `"new"`.
    pub fn allow_constructor(&self, class_name: &str) -> bool {
        self.allow_method(class_name, "new")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PermissionsError {
    UnexpectedEof,
    UnexpectedToken(String),
}

impl std::fmt::Display for PermissionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionsError::UnexpectedEof => write!(f, "unexpected end of permissions input"),
            PermissionsError::UnexpectedToken(t) => write!(f, "unexpected token: {}", t),
        }
    }
}

impl std::error::Error for PermissionsError {}

/// Parses the permissions grammar. Minimal hand-rolled tokenizer
/// (the grammar is small enough that a full `nom` combinator tree would
/// be overkill): skip trivia, match tokens.
pub fn parse(source: &str) -> Result<Permissions, PermissionsError> {
    let tokens = tokenize(source);
    let mut parser = DslParser { tokens, pos: 0 };
    let mut perms = Permissions::default();
    while parser.peek().is_some() {
        parser.parse_top_level(&mut perms)?;
    }
    Ok(perms)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Plus,
    Minus,
    Dot,
    Star,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Semi,
}

fn tokenize(source: &str) -> Vec<Tok> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Tok::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Tok::Minus);
            }
            '.' => {
                chars.next();
                tokens.push(Tok::Dot);
            }
            '*' => {
                chars.next();
                tokens.push(Tok::Star);
            }
            '{' => {
                chars.next();
                tokens.push(Tok::LBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Tok::RBrace);
            }
            '(' => {
                chars.next();
                tokens.push(Tok::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Tok::RParen);
            }
            ';' => {
                chars.next();
                tokens.push(Tok::Semi);
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Tok::Ident(ident));
            }
            _ => {
                chars.next();
            }
        }
    }
    tokens
}

struct DslParser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl DslParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_ident(&mut self) -> Result<String, PermissionsError> {
        match self.next() {
            Some(Tok::Ident(s)) => Ok(s),
            Some(t) => Err(PermissionsError::UnexpectedToken(format!("{:?}", t))),
            None => Err(PermissionsError::UnexpectedEof),
        }
    }

    /// Reads a dotted package/class path: `a.b.c` or `a.b.*`.
    fn parse_dotted_path(&mut self) -> Result<(String, bool), PermissionsError> {
        let mut parts = vec![self.expect_ident()?];
        let mut wildcard = false;
        while matches!(self.peek(), Some(Tok::Dot)) {
            self.next();
            if matches!(self.peek(), Some(Tok::Star)) {
                self.next();
                wildcard = true;
                break;
            }
            parts.push(self.expect_ident()?);
        }
        Ok((parts.join("."), wildcard))
    }

    fn parse_top_level(&mut self, perms: &mut Permissions) -> Result<(), PermissionsError> {
        if matches!(self.peek(), Some(Tok::Plus) | Some(Tok::Minus)) {
            self.parse_class_block(perms, String::new())?;
            return Ok(());
        }
        let (path, wildcard) = self.parse_dotted_path()?;
        if wildcard {
            perms.wildcard_packages.push(format!("{}.", path));
            return Ok(());
        }
        if matches!(self.peek(), Some(Tok::LBrace)) {
            self.parse_package_block(perms, &path)?;
        }
        Ok(())
    }

    fn parse_package_block(&mut self, perms: &mut Permissions, pkg: &str) -> Result<(), PermissionsError> {
        self.next(); // consume '{'
        while !matches!(self.peek(), Some(Tok::RBrace) | None) {
            self.parse_class_block(perms, format!("{}.", pkg))?;
        }
        self.next(); // consume '}'
        Ok(())
    }

    fn parse_class_block(&mut self, perms: &mut Permissions, prefix: String) -> Result<(), PermissionsError> {
        let sign = match self.peek() {
            Some(Tok::Plus) => {
                self.next();
                Some(true)
            }
            Some(Tok::Minus) => {
                self.next();
                Some(false)
            }
            _ => None,
        };
        let name = self.expect_ident()?;
        let full_name = format!("{}{}", prefix, name);
        let mut methods = HashSet::new();
        let mut fields = HashSet::new();
        if matches!(self.peek(), Some(Tok::LBrace)) {
            self.next();
            while !matches!(self.peek(), Some(Tok::RBrace) | None) {
                let member_name = self.expect_ident()?;
                let is_method = matches!(self.peek(), Some(Tok::LParen));
                if is_method {
                    self.next();
                    if matches!(self.peek(), Some(Tok::RParen)) {
                        self.next();
                    }
                }
                if matches!(self.peek(), Some(Tok::Semi)) {
                    self.next();
                }
                if is_method {
                    methods.insert(member_name);
                } else {
                    fields.insert(member_name);
                }
            }
            self.next(); // consume '}'
        }
        let rule = match sign {
            Some(true) => ClassRule::AllowListed { methods, fields },
            _ => ClassRule::DenyListed { methods, fields },
        };
        perms.classes.insert(full_name, rule);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_allows_package() {
        let perms = parse("com.acme.*").unwrap();
        assert!(perms.allow_class("com.acme.Widget"));
        assert!(!perms.allow_class("com.other.Widget"));
    }

    #[test]
    fn test_deny_block_blocks_listed_method() {
        let perms = parse("-Widget { danger(); secret; }").unwrap();
        assert!(!perms.allow_method("Widget", "danger"));
        assert!(perms.allow_method("Widget", "safe"));
    }

    #[test]
    fn test_allow_block_only_lists_allowed() {
        let perms = parse("+Widget { ok(); }").unwrap();
        assert!(perms.allow_method("Widget", "ok"));
        assert!(!perms.allow_method("Widget", "anything_else"));
    }

    #[test]
    fn test_comment_is_ignored() {
        let perms = parse("# allow everything in acme\ncom.acme.*").unwrap();
        assert!(perms.allow_class("com.acme.Foo"));
    }

    #[test]
    fn test_empty_deny_block_allows_all_members() {
        let perms = parse("-Widget {}").unwrap();
        assert!(perms.allow_method("Widget", "anything"));
    }

    #[test]
    fn test_empty_allow_block_denies_all_members() {
        let perms = parse("+Widget {}").unwrap();
        assert!(!perms.allow_method("Widget", "anything"));
    }

    #[test]
    fn test_method_and_field_denylists_are_independent() {
        let perms = parse("-Widget { foo(); bar; }").unwrap();
        assert!(!perms.allow_method("Widget", "foo"));
        assert!(perms.allow_field("Widget", "foo"));
        assert!(!perms.allow_field("Widget", "bar"));
        assert!(perms.allow_method("Widget", "bar"));
    }

    #[test]
    fn test_allow_constructor_uses_method_namespace() {
        let perms = parse("+Widget { new(); ok(); }").unwrap();
        assert!(perms.allow_constructor("Widget"));
        assert!(!perms.allow_field("Widget", "new"));
    }
}
