//! Manifest validation and product resolution.
//!
//! A [`Manifest`] is built once from a [`Declaration`] and never changes
//! afterwards. All reference and cycle checks happen in [`Manifest::load`],
//! so resolution on a loaded manifest cannot encounter a dangling name or a
//! cycle.

use std::collections::{HashMap, HashSet};
#[cfg(feature = "parsing")]
use std::path::{Path, PathBuf};

use framepin_schema::{
    ArtifactName, Declaration, DigestError, PackageDecl, ProductName, Sha256Digest,
};
use thiserror::Error;

/// Which namespace a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// An `[[artifact]]` name.
    Artifact,
    /// A `[[product]]` name.
    Product,
}

impl std::fmt::Display for NameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Artifact => write!(f, "artifact"),
            Self::Product => write!(f, "product"),
        }
    }
}

/// Errors detected while loading a manifest or resolving against it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Two artifacts or two products share a name.
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName {
        /// Namespace of the clash.
        kind: NameKind,
        /// The repeated name.
        name: String,
    },

    /// A product or edge names something that is not declared.
    #[error("{owner} references undeclared {kind} '{name}'")]
    DanglingReference {
        /// Where the reference appears.
        owner: String,
        /// Namespace of the missing name.
        kind: NameKind,
        /// The missing name.
        name: String,
    },

    /// The product dependency graph has a cycle.
    #[error("circular product dependency: {}", format_cycle(.cycle))]
    CyclicDependency {
        /// Products on the cycle, first and last entry equal.
        cycle: Vec<ProductName>,
    },

    /// A product lists no artifacts.
    #[error("product '{0}' declares no artifacts")]
    EmptyProduct(ProductName),

    /// An artifact URL is empty or has an unsupported scheme.
    #[error("artifact '{artifact}' has unsupported source '{url}' (expected http, https or file)")]
    InvalidSource {
        /// Offending artifact.
        artifact: ArtifactName,
        /// The declared URL.
        url: String,
    },

    /// An artifact checksum is not a SHA256 hex digest.
    #[error("artifact '{artifact}' has an invalid checksum: {source}")]
    InvalidChecksum {
        /// Offending artifact.
        artifact: ArtifactName,
        /// Why the checksum was rejected.
        source: DigestError,
    },

    /// A product was requested that the manifest does not declare.
    #[error("product '{0}' is not declared")]
    UnknownProduct(String),
}

fn format_cycle(cycle: &[ProductName]) -> String {
    cycle
        .iter()
        .map(ProductName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors reading a declaration file from disk.
#[cfg(feature = "parsing")]
#[derive(Error, Debug)]
pub enum DeclarationError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The text is not a valid TOML declaration.
    #[error("failed to parse TOML declaration: {0}")]
    Toml(#[from] toml::de::Error),

    /// The text is not a valid JSON declaration.
    #[error("failed to parse JSON declaration: {0}")]
    Json(#[from] serde_json::Error),
}

/// A validated binary artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Unique artifact name.
    pub name: ArtifactName,
    /// Remote source (`http`, `https` or `file` URL).
    pub url: String,
    /// Expected SHA256 of the fetched bytes.
    pub checksum: Sha256Digest,
}

/// A validated product with its merged dependency edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    /// Unique product name.
    pub name: ProductName,
    /// Constituent artifacts in declaration order (never empty).
    pub artifacts: Vec<ArtifactName>,
    /// Directly required products in declaration order.
    pub depends_on: Vec<ProductName>,
}

/// An immutable, validated artifact/product graph.
#[derive(Debug, Clone)]
pub struct Manifest {
    package: Option<PackageDecl>,
    artifacts: Vec<Artifact>,
    products: Vec<Product>,
    artifact_index: HashMap<ArtifactName, usize>,
    product_index: HashMap<ProductName, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl Manifest {
    /// Validate a declaration and build the manifest graph.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found: duplicate names, bad
    /// sources or checksums, empty products, dangling references, or a cycle
    /// in the product dependency graph.
    pub fn load(declaration: Declaration) -> Result<Self, ValidationError> {
        let Declaration {
            package,
            artifacts: artifact_decls,
            products: product_decls,
            dependencies,
        } = declaration;

        let mut artifacts = Vec::with_capacity(artifact_decls.len());
        let mut artifact_index = HashMap::new();
        for decl in artifact_decls {
            if artifact_index.contains_key(&decl.name) {
                return Err(ValidationError::DuplicateName {
                    kind: NameKind::Artifact,
                    name: decl.name.to_string(),
                });
            }
            if !is_supported_source(&decl.url) {
                return Err(ValidationError::InvalidSource {
                    artifact: decl.name,
                    url: decl.url,
                });
            }
            let checksum = match Sha256Digest::new(decl.checksum) {
                Ok(checksum) => checksum,
                Err(source) => {
                    return Err(ValidationError::InvalidChecksum {
                        artifact: decl.name,
                        source,
                    });
                }
            };
            artifact_index.insert(decl.name.clone(), artifacts.len());
            artifacts.push(Artifact {
                name: decl.name,
                url: decl.url,
                checksum,
            });
        }

        let mut products = Vec::with_capacity(product_decls.len());
        let mut product_index = HashMap::new();
        for decl in product_decls {
            if product_index.contains_key(&decl.name) {
                return Err(ValidationError::DuplicateName {
                    kind: NameKind::Product,
                    name: decl.name.to_string(),
                });
            }
            if decl.artifacts.is_empty() {
                return Err(ValidationError::EmptyProduct(decl.name));
            }
            if let Some(missing) = decl
                .artifacts
                .iter()
                .find(|a| !artifact_index.contains_key(*a))
            {
                return Err(ValidationError::DanglingReference {
                    owner: format!("product '{}'", decl.name),
                    kind: NameKind::Artifact,
                    name: missing.to_string(),
                });
            }
            product_index.insert(decl.name.clone(), products.len());
            products.push(Product {
                name: decl.name,
                artifacts: decl.artifacts,
                depends_on: Vec::new(),
            });
        }

        for edge in dependencies {
            let Some(&consumer) = product_index.get(&edge.product) else {
                return Err(ValidationError::DanglingReference {
                    owner: "dependency edge".to_string(),
                    kind: NameKind::Product,
                    name: edge.product.to_string(),
                });
            };
            for dep in edge.depends_on {
                if !product_index.contains_key(&dep) {
                    return Err(ValidationError::DanglingReference {
                        owner: format!("dependency edge of '{}'", edge.product),
                        kind: NameKind::Product,
                        name: dep.to_string(),
                    });
                }
                let depends_on = &mut products[consumer].depends_on;
                if !depends_on.contains(&dep) {
                    depends_on.push(dep);
                }
            }
        }

        let manifest = Self {
            package,
            artifacts,
            products,
            artifact_index,
            product_index,
        };
        manifest.check_acyclic()?;
        Ok(manifest)
    }

    /// The `[package]` metadata, if declared.
    pub fn package(&self) -> Option<&PackageDecl> {
        self.package.as_ref()
    }

    /// All artifacts in declaration order.
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// All products in declaration order.
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    /// Look up an artifact by name.
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifact_index.get(name).map(|&i| &self.artifacts[i])
    }

    /// Look up a product by name.
    pub fn product(&self, name: &str) -> Option<&Product> {
        self.product_index.get(name).map(|&i| &self.products[i])
    }

    /// Direct dependencies of a product, or `None` if it is not declared.
    pub fn dependencies_of(&self, name: &str) -> Option<&[ProductName]> {
        self.product(name).map(|p| p.depends_on.as_slice())
    }

    /// Returns the products required by `name` in load order: every
    /// dependency before its dependents, `name` itself last.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownProduct`] if `name` is not declared.
    pub fn product_closure(&self, name: &str) -> Result<Vec<&Product>, ValidationError> {
        let root = self
            .product(name)
            .ok_or_else(|| ValidationError::UnknownProduct(name.to_string()))?;

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        self.collect_closure(root, &mut order, &mut visited);
        Ok(order)
    }

    /// Returns the artifacts needed to load `name`, ordered so that every
    /// artifact of a required product precedes the artifacts of the products
    /// that depend on it. Declaration order is kept between siblings and an
    /// artifact shared by several products appears once.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownProduct`] if `name` is not declared.
    pub fn resolve_product(&self, name: &str) -> Result<Vec<&Artifact>, ValidationError> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for product in self.product_closure(name)? {
            for artifact_name in &product.artifacts {
                if seen.insert(artifact_name) {
                    if let Some(artifact) = self.artifact(artifact_name) {
                        ordered.push(artifact);
                    }
                }
            }
        }
        Ok(ordered)
    }

    fn collect_closure<'a>(
        &'a self,
        product: &'a Product,
        order: &mut Vec<&'a Product>,
        visited: &mut HashSet<&'a str>,
    ) {
        if !visited.insert(product.name.as_str()) {
            return;
        }
        for dep in &product.depends_on {
            if let Some(dep_product) = self.product(dep) {
                self.collect_closure(dep_product, order, visited);
            }
        }
        order.push(product);
    }

    fn check_acyclic(&self) -> Result<(), ValidationError> {
        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        for product in &self.products {
            self.visit(product, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        product: &'a Product,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a ProductName>,
    ) -> Result<(), ValidationError> {
        match marks.get(product.name.as_str()) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack
                    .iter()
                    .position(|n| **n == product.name)
                    .unwrap_or(0);
                let mut cycle: Vec<ProductName> =
                    stack[start..].iter().map(|n| (*n).clone()).collect();
                cycle.push(product.name.clone());
                return Err(ValidationError::CyclicDependency { cycle });
            }
            None => {}
        }

        marks.insert(product.name.as_str(), Mark::Visiting);
        stack.push(&product.name);

        for dep in &product.depends_on {
            if let Some(dep_product) = self.product(dep) {
                self.visit(dep_product, marks, stack)?;
            }
        }

        stack.pop();
        marks.insert(product.name.as_str(), Mark::Done);
        Ok(())
    }
}

fn is_supported_source(url: &str) -> bool {
    ["https://", "http://", "file://"]
        .iter()
        .any(|scheme| url.len() > scheme.len() && url.starts_with(scheme))
}

/// Parse a declaration from TOML text.
///
/// # Errors
///
/// Returns [`DeclarationError::Toml`] if the text is not a valid declaration.
#[cfg(feature = "parsing")]
pub fn parse_declaration(content: &str) -> Result<Declaration, DeclarationError> {
    Ok(toml::from_str(content)?)
}

/// Asynchronously read a declaration file.
///
/// Files ending in `.json` are parsed as JSON, everything else as TOML.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
#[cfg(feature = "parsing")]
pub async fn read_declaration(path: &Path) -> Result<Declaration, DeclarationError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DeclarationError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if path.extension().is_some_and(|ext| ext == "json") {
        Ok(serde_json::from_str(&content)?)
    } else {
        parse_declaration(&content)
    }
}
