pub mod odds_feed;
pub mod price_feed;
