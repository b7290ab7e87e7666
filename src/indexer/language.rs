//! Programming language detection and tree-sitter grammar registry

use std::path::Path;

/// A language with a bundled tree-sitter grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Swift,
}

/// How a syntax node participates in chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// Function or method body
    Callable,
    /// Class-like container whose callables are methods
    Container,
    /// Module or namespace
    Namespace,
}

impl Language {
    /// Detect language from a file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        let lang = match extension.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "js" | "mjs" | "cjs" | "jsx" => Language::JavaScript,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "cs" => Language::CSharp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            _ => return None,
        };
        Some(lang)
    }

    /// Detect language from a path's extension
    pub fn from_path(path: &str) -> Option<Self> {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Human-readable language name
    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "Rust",
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Tsx => "TypeScript (TSX)",
            Language::Go => "Go",
            Language::Java => "Java",
            Language::C => "C",
            Language::Cpp => "C++",
            Language::CSharp => "C#",
            Language::Ruby => "Ruby",
            Language::Php => "PHP",
            Language::Swift => "Swift",
        }
    }

    pub fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Language::Ruby => tree_sitter_ruby::LANGUAGE.into(),
            Language::Php => tree_sitter_php::LANGUAGE_PHP.into(),
            Language::Swift => tree_sitter_swift::LANGUAGE.into(),
        }
    }

    /// Classify a node kind as a chunk boundary for this language
    pub fn classify(&self, kind: &str) -> Option<DeclKind> {
        use DeclKind::*;
        let decl = match (self, kind) {
            (Language::Rust, "function_item" | "function_signature_item") => Callable,
            (Language::Rust, "impl_item" | "trait_item" | "struct_item" | "enum_item") => {
                Container
            }
            (Language::Rust, "mod_item") => Namespace,

            (Language::Python, "function_definition") => Callable,
            (Language::Python, "class_definition") => Container,

            (
                Language::JavaScript | Language::TypeScript | Language::Tsx,
                "function_declaration"
                | "generator_function_declaration"
                | "function_expression"
                | "arrow_function"
                | "method_definition",
            ) => Callable,
            (
                Language::JavaScript | Language::TypeScript | Language::Tsx,
                "class_declaration" | "class",
            ) => Container,
            (
                Language::TypeScript | Language::Tsx,
                "abstract_class_declaration" | "interface_declaration" | "enum_declaration",
            ) => Container,
            (Language::TypeScript | Language::Tsx, "internal_module" | "module") => Namespace,

            (Language::Go, "function_declaration" | "method_declaration") => Callable,
            (Language::Go, "type_declaration") => Container,

            (Language::Java, "method_declaration" | "constructor_declaration") => Callable,
            (
                Language::Java,
                "class_declaration"
                | "interface_declaration"
                | "enum_declaration"
                | "record_declaration",
            ) => Container,

            (Language::C, "function_definition") => Callable,
            (Language::C, "struct_specifier" | "enum_specifier" | "union_specifier") => Container,

            (Language::Cpp, "function_definition") => Callable,
            (
                Language::Cpp,
                "class_specifier" | "struct_specifier" | "enum_specifier" | "union_specifier",
            ) => Container,
            (Language::Cpp, "namespace_definition") => Namespace,

            (
                Language::CSharp,
                "method_declaration" | "constructor_declaration" | "property_declaration",
            ) => Callable,
            (
                Language::CSharp,
                "class_declaration"
                | "struct_declaration"
                | "interface_declaration"
                | "enum_declaration"
                | "record_declaration",
            ) => Container,
            (Language::CSharp, "namespace_declaration") => Namespace,

            (Language::Ruby, "method" | "singleton_method") => Callable,
            (Language::Ruby, "class" | "singleton_class") => Container,
            (Language::Ruby, "module") => Namespace,

            (Language::Php, "function_definition" | "method_declaration") => Callable,
            (
                Language::Php,
                "class_declaration" | "interface_declaration" | "trait_declaration",
            ) => Container,
            (Language::Php, "namespace_definition") => Namespace,

            (
                Language::Swift,
                "function_declaration"
                | "init_declaration"
                | "deinit_declaration"
                | "subscript_declaration",
            ) => Callable,
            (
                Language::Swift,
                "class_declaration" | "protocol_declaration" | "extension_declaration",
            ) => Container,

            _ => return None,
        };
        Some(decl)
    }

    /// Callables that are methods even at the top level of a file
    pub fn is_receiver_method(&self, kind: &str) -> bool {
        matches!(
            (self, kind),
            (Language::Go, "method_declaration") | (Language::Ruby, "singleton_method")
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language_rust() {
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("RS"), Some(Language::Rust));
    }

    #[test]
    fn test_detect_language_javascript() {
        assert_eq!(Language::from_extension("js"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("mjs"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("jsx"), Some(Language::JavaScript));
    }

    #[test]
    fn test_detect_language_typescript() {
        assert_eq!(Language::from_extension("ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("tsx"), Some(Language::Tsx));
    }

    #[test]
    fn test_detect_language_cpp() {
        for ext in ["cpp", "cc", "cxx", "hpp"] {
            assert_eq!(Language::from_extension(ext), Some(Language::Cpp), "failed for .{ext}");
        }
    }

    #[test]
    fn test_detect_language_unknown() {
        assert_eq!(Language::from_extension("md"), None);
        assert_eq!(Language::from_path("Makefile"), None);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(Language::from_path("src/deep/mod.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("app/models/user.rb"), Some(Language::Ruby));
    }

    #[test]
    fn test_classify() {
        assert_eq!(Language::Rust.classify("function_item"), Some(DeclKind::Callable));
        assert_eq!(Language::Rust.classify("impl_item"), Some(DeclKind::Container));
        assert_eq!(Language::Rust.classify("mod_item"), Some(DeclKind::Namespace));
        assert_eq!(Language::Rust.classify("use_declaration"), None);
        assert_eq!(Language::Python.classify("class_definition"), Some(DeclKind::Container));
        assert_eq!(Language::Go.classify("class_definition"), None);
    }

    #[test]
    fn test_receiver_methods() {
        assert!(Language::Go.is_receiver_method("method_declaration"));
        assert!(!Language::Go.is_receiver_method("function_declaration"));
    }

    #[test]
    fn test_every_grammar_loads() {
        let all = [
            Language::Rust,
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Tsx,
            Language::Go,
            Language::Java,
            Language::C,
            Language::Cpp,
            Language::CSharp,
            Language::Ruby,
            Language::Php,
            Language::Swift,
        ];
        for lang in all {
            let mut parser = tree_sitter::Parser::new();
            assert!(parser.set_language(&lang.grammar()).is_ok(), "{lang}");
        }
    }
}
