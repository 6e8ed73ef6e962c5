// Source: https://api.exchange.coinbase.com/products/{product_id}/book?level={1|2}
// Each level is [price, size, num_orders]; only price and size are kept.
use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBook {
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLevel {
    pub price: String, // e.g. "67012.45"
    pub size: String,  // e.g. "0.01250000"
}

impl RawLevel {
    pub fn new(price: impl Into<String>, size: impl Into<String>) -> Self {
        Self { price: price.into(), size: size.into() }
    }
}

impl<'de> Deserialize<'de> for RawLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LevelVisitor;

        impl<'de> Visitor<'de> for LevelVisitor {
            type Value = RawLevel;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array [price, size, ...]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawLevel, A::Error> {
                let price: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let size: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                // drain num_orders and anything newer
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(RawLevel { price, size })
            }
        }

        deserializer.deserialize_seq(LevelVisitor)
    }
}
