pub mod core;
pub mod exchanges;

pub use crate::core::{
    config::MarketKind,
    errors::ExchangeError,
    traits::{
        AccountInfo, ExchangeConnector, FundingInfoSource, OrderBookDataSource, OrderPlacer,
        UserStreamDataSource,
    },
    types::*,
};
pub use exchanges::backpack::{build_connector, BackpackConnector};
