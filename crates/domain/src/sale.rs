//! Time-boxed category sales and the registry that keeps at most one of
//! them active.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::money::Rate;

const MAX_SALE_PERCENT: u32 = 95;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaleError {
    #[error("invalid sale: {0}")]
    InvalidDefinition(String),

    #[error("sale '{0}' already exists")]
    AlreadyExists(String),

    #[error("sale is not registered")]
    NotRegistered,
}

impl SaleError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            SaleError::InvalidDefinition(_) => "SALE_INVALID",
            SaleError::AlreadyExists(_) => "SALE_ALREADY_EXISTS",
            SaleError::NotRegistered => "SALE_NOT_FOUND",
        }
    }
}

/// Discount for one category. Members get `prime_discount` when it is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDiscount {
    pub category: String,
    pub discount: Rate,
    #[serde(default)]
    pub prime_discount: Rate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleDefinition {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub categories: Vec<CategoryDiscount>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub active: bool,
}

impl SaleDefinition {
    pub fn validate(&self) -> Result<(), SaleError> {
        let invalid = |msg: &str| Err(SaleError::InvalidDefinition(msg.to_string()));

        if self.name.trim().is_empty() {
            return invalid("name is required");
        }
        if self.slug.trim().is_empty() {
            return invalid("slug is required");
        }
        if self.categories.is_empty() {
            return invalid("at least one category discount is required");
        }
        for c in &self.categories {
            if c.category.trim().is_empty() {
                return invalid("category name is required");
            }
            let percent = c.discount.bps();
            if !(100..=MAX_SALE_PERCENT * 100).contains(&percent) {
                return invalid("discount must be between 1% and 95%");
            }
            if c.prime_discount.bps() > MAX_SALE_PERCENT * 100 {
                return invalid("prime discount must be at most 95%");
            }
        }
        if self.ends_at <= self.starts_at {
            return invalid("end must be after start");
        }
        Ok(())
    }

    /// Normalized slug used to derive the sale id.
    pub fn normalized_slug(&self) -> String {
        self.slug.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SaleEvent {
    SaleCreated(SaleCreatedData),
    SaleActivated { at: DateTime<Utc> },
    SaleDeactivated { at: DateTime<Utc> },
}

impl DomainEvent for SaleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SaleEvent::SaleCreated(_) => "SaleCreated",
            SaleEvent::SaleActivated { .. } => "SaleActivated",
            SaleEvent::SaleDeactivated { .. } => "SaleDeactivated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleCreatedData {
    pub sale_id: AggregateId,
    pub definition: SaleDefinition,
    pub created_at: DateTime<Utc>,
}

/// A time-boxed category sale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sale {
    id: Option<AggregateId>,
    #[serde(skip)]
    version: Version,
    name: String,
    slug: String,
    description: String,
    categories: Vec<CategoryDiscount>,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    active: bool,
}

impl Sale {
    pub fn id_for_slug(slug: &str) -> AggregateId {
        AggregateId::derived("sale", &slug.trim().to_lowercase())
    }

    pub fn sale_id(&self) -> Option<AggregateId> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn categories(&self) -> &[CategoryDiscount] {
        &self.categories
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        self.starts_at
    }

    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Active and inside its window.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        match (self.starts_at, self.ends_at) {
            (Some(start), Some(end)) => self.active && start <= now && now <= end,
            _ => false,
        }
    }

    /// Rate for a category, matched case-insensitively.
    pub fn rate_for(&self, category: &str, is_member: bool) -> Option<Rate> {
        let entry = self
            .categories
            .iter()
            .find(|c| c.category.eq_ignore_ascii_case(category.trim()))?;
        if is_member && !entry.prime_discount.is_zero() {
            Some(entry.prime_discount)
        } else {
            Some(entry.discount)
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(categories: Vec<CategoryDiscount>) -> Self {
        Self {
            id: Some(AggregateId::new()),
            name: "Test sale".into(),
            slug: "test-sale".into(),
            categories,
            active: true,
            ..Self::default()
        }
    }
}

// Command methods
impl Sale {
    pub fn create(&self, definition: SaleDefinition) -> Result<Vec<SaleEvent>, SaleError> {
        if self.id.is_some() {
            return Err(SaleError::AlreadyExists(definition.slug));
        }
        definition.validate()?;
        Ok(vec![SaleEvent::SaleCreated(SaleCreatedData {
            sale_id: Self::id_for_slug(&definition.slug),
            definition,
            created_at: Utc::now(),
        })])
    }

    pub fn activate(&self) -> Result<Vec<SaleEvent>, SaleError> {
        self.require_created()?;
        if self.active {
            return Ok(vec![]);
        }
        Ok(vec![SaleEvent::SaleActivated { at: Utc::now() }])
    }

    pub fn deactivate(&self) -> Result<Vec<SaleEvent>, SaleError> {
        self.require_created()?;
        if !self.active {
            return Ok(vec![]);
        }
        Ok(vec![SaleEvent::SaleDeactivated { at: Utc::now() }])
    }

    fn require_created(&self) -> Result<(), SaleError> {
        if self.id.is_none() {
            return Err(SaleError::NotRegistered);
        }
        Ok(())
    }
}

impl Aggregate for Sale {
    type Event = SaleEvent;
    type Error = SaleError;

    fn aggregate_type() -> &'static str {
        "Sale"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SaleEvent::SaleCreated(data) => {
                let def = data.definition;
                self.id = Some(data.sale_id);
                self.name = def.name;
                self.slug = def.slug.trim().to_lowercase();
                self.description = def.description;
                self.categories = def.categories;
                self.starts_at = Some(def.starts_at);
                self.ends_at = Some(def.ends_at);
                self.active = def.active;
            }
            SaleEvent::SaleActivated { .. } => self.active = true,
            SaleEvent::SaleDeactivated { .. } => self.active = false,
        }
    }
}

/// Singleton listing every sale and the one currently flagged active.
///
/// Every activation touches the registry, so two concurrent activations
/// conflict at commit instead of leaving two sales active.
#[derive(Debug, Clone, Default)]
pub struct SaleRegistry {
    id: Option<AggregateId>,
    version: Version,
    sales: Vec<AggregateId>,
    active: Option<AggregateId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SaleRegistryEvent {
    SaleRegistered {
        registry_id: AggregateId,
        sale_id: AggregateId,
    },
    ActiveSaleChanged {
        sale_id: Option<AggregateId>,
    },
}

impl DomainEvent for SaleRegistryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SaleRegistryEvent::SaleRegistered { .. } => "SaleRegistered",
            SaleRegistryEvent::ActiveSaleChanged { .. } => "ActiveSaleChanged",
        }
    }
}

impl SaleRegistry {
    pub fn registry_id() -> AggregateId {
        AggregateId::derived("sale-registry", "global")
    }

    pub fn sales(&self) -> &[AggregateId] {
        &self.sales
    }

    pub fn active(&self) -> Option<AggregateId> {
        self.active
    }

    pub fn register(&self, sale_id: AggregateId) -> Vec<SaleRegistryEvent> {
        if self.sales.contains(&sale_id) {
            return vec![];
        }
        vec![SaleRegistryEvent::SaleRegistered {
            registry_id: Self::registry_id(),
            sale_id,
        }]
    }

    /// Records a new active sale, or none. Returns the previously active
    /// sale that the caller must deactivate in the same unit.
    pub fn set_active(
        &self,
        sale_id: Option<AggregateId>,
    ) -> Result<(Vec<SaleRegistryEvent>, Option<AggregateId>), SaleError> {
        if let Some(id) = sale_id
            && !self.sales.contains(&id)
        {
            return Err(SaleError::NotRegistered);
        }
        if self.active == sale_id {
            return Ok((vec![], None));
        }
        Ok((
            vec![SaleRegistryEvent::ActiveSaleChanged { sale_id }],
            self.active,
        ))
    }
}

impl Aggregate for SaleRegistry {
    type Event = SaleRegistryEvent;
    type Error = SaleError;

    fn aggregate_type() -> &'static str {
        "SaleRegistry"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SaleRegistryEvent::SaleRegistered {
                registry_id,
                sale_id,
            } => {
                self.id = Some(registry_id);
                self.sales.push(sale_id);
            }
            SaleRegistryEvent::ActiveSaleChanged { sale_id } => self.active = sale_id,
        }
    }
}
