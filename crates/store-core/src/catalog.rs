//! E-book Catalog
//!
//! The in-memory catalog and the read-only lookup the checkout builder
//! resolves cart items through.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::account::Account;
use crate::error::{Result, StoreError};
use crate::pricing::EBOOK_PRICE_MINOR_UNITS;

/// Cover used for authored e-books
pub const DEFAULT_COVER_URL: &str =
    "https://images.unsplash.com/photo-1497633762265-9d179a990aa6?w=400&h=600&fit=crop";

/// Categories an e-book may be filed under
pub const CATEGORIES: [&str; 6] = [
    "Ficção",
    "Negócios",
    "Tecnologia",
    "Autoajuda",
    "Romance",
    "Ciência",
];

/// E-book identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

impl From<u32> for ItemId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A catalog entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ebook {
    pub id: ItemId,
    pub title: String,
    pub author: String,
    pub category: String,
    pub description: String,
    pub pages: u32,
    pub cover_url: String,

    /// Price in centavos
    pub price_minor_units: u64,
}

/// Authoring form for a new e-book
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewEbook {
    pub title: String,
    pub author: String,
    pub category: String,
    pub description: String,
    pub pages: u32,
}

impl NewEbook {
    fn validate(&self) -> Result<()> {
        let required = [
            ("title", &self.title),
            ("author", &self.author),
            ("category", &self.category),
            ("description", &self.description),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(StoreError::InvalidEbook(format!("{field} is required")));
            }
        }

        if !CATEGORIES.contains(&self.category.as_str()) {
            return Err(StoreError::InvalidEbook(format!(
                "unknown category '{}'",
                self.category
            )));
        }

        if self.pages == 0 {
            return Err(StoreError::InvalidEbook("pages must be at least 1".into()));
        }

        Ok(())
    }
}

/// What checkout needs to know about one item for one customer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemView {
    pub title: String,
    pub price_minor_units: u64,
    pub already_owned: bool,
}

/// Read-only item lookup consumed by the checkout builder
pub trait ItemLookup {
    /// Resolve an item, or `None` when the id is unknown
    fn lookup(&self, id: ItemId) -> Option<ItemView>;
}

/// In-memory e-book catalog
pub struct Catalog {
    ebooks: RwLock<BTreeMap<ItemId, Ebook>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            ebooks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a catalog seeded with the launch titles
    pub fn with_defaults() -> Self {
        let catalog = Self::new();
        {
            let mut ebooks = catalog.write();
            for ebook in seed_ebooks() {
                ebooks.insert(ebook.id, ebook);
            }
        }
        catalog
    }

    // Writers only ever insert a fully built entry, so a poisoned lock still
    // guards a consistent map.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ItemId, Ebook>> {
        self.ebooks.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ItemId, Ebook>> {
        self.ebooks.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// All e-books ordered by id
    pub fn list(&self) -> Vec<Ebook> {
        self.read().values().cloned().collect()
    }

    /// Get an e-book by id
    pub fn get(&self, id: ItemId) -> Option<Ebook> {
        self.read().get(&id).cloned()
    }

    /// Known categories
    pub fn categories(&self) -> &'static [&'static str] {
        &CATEGORIES
    }

    /// Number of e-books in a category
    pub fn count_in(&self, category: &str) -> usize {
        self.read()
            .values()
            .filter(|e| e.category == category)
            .count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Author a new e-book at the standard price
    pub fn create(&self, new: NewEbook) -> Result<Ebook> {
        new.validate()?;

        let mut ebooks = self.write();
        let next_id = ebooks.keys().next_back().map_or(1, |id| id.0 + 1);

        let ebook = Ebook {
            id: ItemId(next_id),
            title: new.title.trim().to_string(),
            author: new.author.trim().to_string(),
            category: new.category,
            description: new.description.trim().to_string(),
            pages: new.pages,
            cover_url: DEFAULT_COVER_URL.into(),
            price_minor_units: EBOOK_PRICE_MINOR_UNITS,
        };
        ebooks.insert(ebook.id, ebook.clone());

        tracing::info!(id = %ebook.id, title = %ebook.title, "Authored e-book");
        Ok(ebook)
    }
}

/// The catalog as seen by one customer
pub struct OwnedCatalog<'a> {
    catalog: &'a Catalog,
    account: &'a Account,
}

impl<'a> OwnedCatalog<'a> {
    pub const fn new(catalog: &'a Catalog, account: &'a Account) -> Self {
        Self { catalog, account }
    }
}

impl ItemLookup for OwnedCatalog<'_> {
    fn lookup(&self, id: ItemId) -> Option<ItemView> {
        self.catalog.get(id).map(|ebook| ItemView {
            title: ebook.title,
            price_minor_units: ebook.price_minor_units,
            already_owned: self.account.owns(id),
        })
    }
}

fn seed_ebooks() -> Vec<Ebook> {
    let titles = [
        ("O Último Farol", "Helena Duarte", "Ficção", 212),
        ("Vendas sem Mistério", "Rafael Costa", "Negócios", 180),
        ("Rust para Iniciantes", "Marina Lopes", "Tecnologia", 340),
        ("Hábitos que Ficam", "Paulo Nogueira", "Autoajuda", 150),
        ("Cartas de Outono", "Beatriz Almeida", "Romance", 264),
        ("O Universo em Números", "Carlos Mendes", "Ciência", 298),
        ("Cidade Submersa", "Lucas Ferreira", "Ficção", 320),
        ("Finanças do Zero", "Ana Ribeiro", "Negócios", 196),
        ("Algoritmos na Prática", "Tiago Martins", "Tecnologia", 410),
        ("Mente Serena", "Juliana Rocha", "Autoajuda", 132),
        ("Entre Marés", "Fernanda Lima", "Romance", 238),
        ("Pequena História do Clima", "Roberto Sales", "Ciência", 256),
    ];

    titles
        .into_iter()
        .zip(1u32..)
        .map(|((title, author, category, pages), id)| Ebook {
            id: ItemId(id),
            title: title.into(),
            author: author.into(),
            category: category.into(),
            description: format!("{title}, por {author}."),
            pages,
            cover_url: DEFAULT_COVER_URL.into(),
            price_minor_units: EBOOK_PRICE_MINOR_UNITS,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> NewEbook {
        NewEbook {
            title: "Guia de Testes".into(),
            author: "Autor".into(),
            category: "Tecnologia".into(),
            description: "Sobre testes".into(),
            pages: 120,
        }
    }

    #[test]
    fn test_default_catalog() {
        let catalog = Catalog::with_defaults();
        assert_eq!(catalog.len(), 12);
        assert_eq!(catalog.get(ItemId(7)).unwrap().price_minor_units, 499);
        assert_eq!(catalog.count_in("Tecnologia"), 2);
    }

    #[test]
    fn test_create_assigns_next_id() {
        let catalog = Catalog::with_defaults();
        let ebook = catalog.create(form()).unwrap();

        assert_eq!(ebook.id, ItemId(13));
        assert_eq!(ebook.price_minor_units, EBOOK_PRICE_MINOR_UNITS);
        assert_eq!(catalog.len(), 13);
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let catalog = Catalog::new();

        let mut blank = form();
        blank.title = "   ".into();
        assert!(matches!(catalog.create(blank), Err(StoreError::InvalidEbook(_))));

        let mut unknown = form();
        unknown.category = "Culinária".into();
        assert!(catalog.create(unknown).is_err());

        let mut empty = form();
        empty.pages = 0;
        assert!(catalog.create(empty).is_err());

        assert!(catalog.is_empty());
    }

    #[test]
    fn test_owned_lookup() {
        let catalog = Catalog::with_defaults();
        let mut account = Account::default();
        account.purchased.insert(ItemId(3));

        let view = OwnedCatalog::new(&catalog, &account);
        assert!(view.lookup(ItemId(3)).unwrap().already_owned);
        assert!(!view.lookup(ItemId(4)).unwrap().already_owned);
        assert!(view.lookup(ItemId(99)).is_none());
    }
}
