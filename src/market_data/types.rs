use std::fmt;

/// Tradable symbol, e.g. `BTC-USD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Book depth requested from the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BookLevel {
    /// Best bid and best ask only
    #[serde(rename = "1")]
    Level1,
    /// Up to 50 aggregated levels per side
    #[serde(rename = "2")]
    Level2,
}

impl BookLevel {
    pub fn as_query(self) -> &'static str {
        match self {
            BookLevel::Level1 => "1",
            BookLevel::Level2 => "2",
        }
    }
}

impl fmt::Display for BookLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.as_query())
    }
}

/// Cache key: one entry and at most one in-flight fetch per request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookRequest {
    pub product: ProductId,
    pub level: BookLevel,
}

impl BookRequest {
    pub fn new(product: impl Into<ProductId>, level: BookLevel) -> Self {
        Self { product: product.into(), level }
    }
}

impl fmt::Display for BookRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.product, self.level)
    }
}

/// A single book entry in fixed-point units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: i64, // ticks
    pub size: u64,  // lots
}

/// Decimal places used to turn wire strings into ticks/lots and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub price_decimals: u32,
    pub size_decimals: u32,
}

impl Scale {
    pub fn price_factor(&self) -> f64 {
        10f64.powi(self.price_decimals as i32)
    }

    pub fn size_factor(&self) -> f64 {
        10f64.powi(self.size_decimals as i32)
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self { price_decimals: 8, size_decimals: 8 }
    }
}
