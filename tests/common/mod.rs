#![allow(dead_code)]

use amm_ledger::{EngineConfig, LedgerEngine, Side, TradeEvent};
use ethers::types::{Address, H256, U256};

/// `tenths` of one 18-decimal unit, e.g. `tenths(25)` is 2.5.
pub fn tenths(n: u64) -> U256 {
    U256::from(n) * U256::exp10(17)
}

pub fn trader(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn engine() -> LedgerEngine {
    LedgerEngine::temporary(EngineConfig::default()).expect("temporary ledger")
}

pub struct EventBuilder {
    event: TradeEvent,
}

impl EventBuilder {
    pub fn new(tx: u64) -> Self {
        Self {
            event: TradeEvent {
                transaction_hash: H256::from_low_u64_be(tx),
                log_index: 0,
                market_id: 7,
                trader: trader(0x0a),
                is_yes: true,
                side: Side::Buy,
                shares_amount: U256::zero(),
                price_bps: 5000,
                cost_amount: U256::zero(),
                block_number: tx,
                block_time: 1_700_000_000,
            },
        }
    }

    pub fn log_index(mut self, log_index: u64) -> Self {
        self.event.log_index = log_index;
        self
    }

    pub fn market(mut self, market_id: u64) -> Self {
        self.event.market_id = market_id;
        self
    }

    pub fn trader(mut self, byte: u8) -> Self {
        self.event.trader = trader(byte);
        self
    }

    pub fn no(mut self) -> Self {
        self.event.is_yes = false;
        self
    }

    pub fn buy(mut self, shares: U256, cost: U256) -> Self {
        self.event.side = Side::Buy;
        self.event.shares_amount = shares;
        self.event.cost_amount = cost;
        self
    }

    pub fn sell(mut self, shares: U256, cost: U256) -> Self {
        self.event.side = Side::Sell;
        self.event.shares_amount = shares;
        self.event.cost_amount = cost;
        self
    }

    pub fn price(mut self, bps: u16) -> Self {
        self.event.price_bps = bps;
        self
    }

    pub fn block(mut self, block_number: u64) -> Self {
        self.event.block_number = block_number;
        self
    }

    pub fn build(self) -> TradeEvent {
        self.event
    }
}
