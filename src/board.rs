//! BoardEngine: the dice board.
//!
//! Each roll charges the fee, moves the player `roll` slots around a
//! fixed-length table and applies the landed case. Case payloads are
//! ABI-encoded in the genesis table and decoded once, at load time, into
//! `BoardCase`; dispatch never looks at raw bytes.

use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::events::{CaseOutcome, Event};
use crate::nodes::NodeRegistry;
use crate::random::RandomSource;
use crate::token::TaxableToken;
use crate::venue::{LiquidityVenue, Market};
use crate::{apply_bps, BPS};

pub const DICE_FACES: u8 = 6;

// ─────────────────────────────────────────────────────────
// Case table
// ─────────────────────────────────────────────────────────

/// A case as stored in the genesis table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCase {
    pub case_type: u8,
    pub info: Bytes,
}

impl RawCase {
    pub fn new(case_type: u8, info: impl Into<Bytes>) -> Self {
        Self {
            case_type,
            info: info.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlatEffect {
    None,
    Credit(U256),
    Debit(U256),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpecialEffect {
    None,
    /// Share of the board's retained balance, in bps.
    Jackpot { share_bps: u32 },
    Airdrop { amount: U256 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoardCase {
    Start,
    Neutral(FlatEffect),
    Special(SpecialEffect),
    NodeOffer { node: Address, discount_bps: u32 },
}

const SPECIAL_JACKPOT: u8 = 1;
const SPECIAL_AIRDROP: u8 = 2;

/// 32-byte ABI word size; shorter payloads carry no effect.
const WORD: usize = 32;

impl BoardCase {
    /// Decodes one table entry, checking node references against `registry`.
    pub fn decode(index: usize, raw: &RawCase, registry: &NodeRegistry) -> EngineResult<Self> {
        let invalid = |reason: String| EngineError::InvalidCase { index, reason };
        let data = raw.info.as_ref();

        let case = match raw.case_type {
            0 => BoardCase::Start,
            1 if data.len() < WORD => BoardCase::Neutral(FlatEffect::None),
            1 => {
                let (credit, amount) = <(bool, U256)>::abi_decode(data)
                    .map_err(|e| invalid(format!("neutral payload: {e}")))?;
                BoardCase::Neutral(if credit {
                    FlatEffect::Credit(amount)
                } else {
                    FlatEffect::Debit(amount)
                })
            }
            2 if data.len() < WORD => BoardCase::Special(SpecialEffect::None),
            2 => {
                let (kind, value) = <(U256, U256)>::abi_decode(data)
                    .map_err(|e| invalid(format!("special payload: {e}")))?;
                let kind = u8::try_from(kind)
                    .map_err(|_| invalid(format!("special kind {kind} out of range")))?;
                BoardCase::Special(match kind {
                    SPECIAL_JACKPOT => SpecialEffect::Jackpot {
                        share_bps: bps_from(value).ok_or_else(|| invalid(format!("jackpot share {value}")))?,
                    },
                    SPECIAL_AIRDROP => SpecialEffect::Airdrop { amount: value },
                    other => return Err(invalid(format!("unknown special kind {other}"))),
                })
            }
            3 => {
                let (node, discount) = if data.len() < 2 * WORD {
                    let node = Address::abi_decode(data)
                        .map_err(|e| invalid(format!("node offer payload: {e}")))?;
                    (node, U256::ZERO)
                } else {
                    <(Address, U256)>::abi_decode(data)
                        .map_err(|e| invalid(format!("node offer payload: {e}")))?
                };
                if registry.node(node).is_none() {
                    return Err(EngineError::UnknownType(node));
                }
                let discount_bps =
                    bps_from(discount).ok_or_else(|| invalid(format!("discount {discount}")))?;
                BoardCase::NodeOffer { node, discount_bps }
            }
            other => return Err(invalid(format!("unknown case type {other}"))),
        };
        Ok(case)
    }
}

/// A bps value in `[0, 10000]`.
fn bps_from(value: U256) -> Option<u32> {
    let bps = u32::try_from(value).ok()?;
    (bps <= BPS).then_some(bps)
}

// ─────────────────────────────────────────────────────────
// Player state
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingOffer {
    pub node: Address,
    /// Discounted price, fixed when the offer was made.
    pub price: U256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlayerState {
    pub position: usize,
    pub laps: u64,
    pub rolls: u64,
    pub pending_offer: Option<PendingOffer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RollReceipt {
    pub roll: u8,
    pub position: usize,
    pub outcome: CaseOutcome,
}

// ─────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BoardEngine {
    address: Address,
    owner: Address,
    treasury: Address,
    roll_fee: U256,
    cases: Vec<BoardCase>,
    players: HashMap<Address, PlayerState>,
}

impl BoardEngine {
    pub fn new(address: Address, owner: Address, treasury: Address, roll_fee: U256) -> Self {
        Self {
            address,
            owner,
            treasury,
            roll_fee,
            cases: Vec::new(),
            players: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn roll_fee(&self) -> U256 {
        self.roll_fee
    }

    pub fn number_of_cases(&self) -> usize {
        self.cases.len()
    }

    pub fn cases(&self) -> &[BoardCase] {
        &self.cases
    }

    pub fn player(&self, account: Address) -> PlayerState {
        self.players.get(&account).copied().unwrap_or_default()
    }

    pub fn players(&self) -> impl Iterator<Item = (Address, PlayerState)> + '_ {
        self.players.iter().map(|(a, p)| (*a, *p))
    }

    pub fn position_of(&self, account: Address) -> usize {
        self.player(account).position
    }

    pub fn laps_of(&self, account: Address) -> u64 {
        self.player(account).laps
    }

    pub fn pending_offer_of(&self, account: Address) -> Option<PendingOffer> {
        self.player(account).pending_offer
    }

    /// Loads the case table. Owner-only, once.
    pub fn set_cases(
        &mut self,
        caller: Address,
        raw: &[RawCase],
        registry: &NodeRegistry,
    ) -> EngineResult<()> {
        if caller != self.owner {
            return Err(EngineError::Unauthorized {
                caller,
                action: "set board cases",
            });
        }
        if !self.cases.is_empty() {
            return Err(EngineError::AlreadyConfigured("board cases"));
        }
        if raw.is_empty() {
            return Err(EngineError::InvalidCase {
                index: 0,
                reason: "empty case table".into(),
            });
        }
        let cases = raw
            .iter()
            .enumerate()
            .map(|(i, c)| BoardCase::decode(i, c, registry))
            .collect::<EngineResult<Vec<_>>>()?;
        info!("🎲 Board loaded: {} cases, fee={}", cases.len(), self.roll_fee);
        self.cases = cases;
        Ok(())
    }

    // ─────────────────────────────────────────────────
    // Rolls
    // ─────────────────────────────────────────────────

    /// Draws the roll from `random` and plays it. A failed draw changes nothing.
    pub fn roll_dice<V: LiquidityVenue + Clone, R: RandomSource + ?Sized>(
        &mut self,
        token: &mut TaxableToken,
        market: &mut Market<V>,
        registry: &NodeRegistry,
        random: &mut R,
        account: Address,
        events: &mut Vec<Event>,
    ) -> EngineResult<RollReceipt> {
        if self.cases.is_empty() {
            return Err(EngineError::BoardNotConfigured);
        }
        let word = random.next_random()?;
        let roll = (word % U256::from(DICE_FACES)).to::<u8>() + 1;
        self.play(token, market, registry, account, roll, events)
    }

    /// Plays an explicit roll. Operator and test builds only.
    #[cfg(any(test, feature = "manual-roll"))]
    pub fn roll_dice_manually<V: LiquidityVenue + Clone>(
        &mut self,
        token: &mut TaxableToken,
        market: &mut Market<V>,
        registry: &NodeRegistry,
        account: Address,
        roll: u8,
        events: &mut Vec<Event>,
    ) -> EngineResult<RollReceipt> {
        if !(1..=DICE_FACES).contains(&roll) {
            return Err(EngineError::InvalidRoll(roll));
        }
        self.play(token, market, registry, account, roll, events)
    }

    fn play<V: LiquidityVenue + Clone>(
        &mut self,
        token: &mut TaxableToken,
        market: &mut Market<V>,
        registry: &NodeRegistry,
        account: Address,
        roll: u8,
        events: &mut Vec<Event>,
    ) -> EngineResult<RollReceipt> {
        let n = self.cases.len();
        if n == 0 {
            return Err(EngineError::BoardNotConfigured);
        }
        let mut player = self.player(account);
        let advanced = player.position + roll as usize;
        let position = advanced % n;
        let case = self.cases[position];

        // Everything the player pays on this roll, checked up front.
        let debit = match case {
            BoardCase::Neutral(FlatEffect::Debit(x)) => x,
            _ => U256::ZERO,
        };
        let cost = self
            .roll_fee
            .checked_add(debit)
            .ok_or(EngineError::ArithmeticOverflow)?;
        let spendable = token
            .balance_of(account)
            .min(token.allowance(account, self.address));
        if spendable < cost {
            return Err(EngineError::InsufficientFunds {
                account,
                needed: cost,
                available: spendable,
            });
        }

        let (outcome, offer) = if self.settles_locally(token, account, case)? {
            self.apply(token, market, registry, account, case, events)?
        } else {
            // A taxed leg can reach the venue; run it against staged copies.
            let mut staged_token = token.clone();
            let mut staged_market = market.clone();
            let mark = events.len();
            match self.apply(
                &mut staged_token,
                &mut staged_market,
                registry,
                account,
                case,
                events,
            ) {
                Ok(applied) => {
                    *token = staged_token;
                    *market = staged_market;
                    applied
                }
                Err(e) => {
                    events.truncate(mark);
                    return Err(e);
                }
            }
        };

        if advanced >= n {
            player.laps += 1;
        }
        player.position = position;
        player.rolls += 1;
        player.pending_offer = offer;
        self.players.insert(account, player);

        events.push(Event::DiceRolled {
            account,
            roll,
            new_position: position,
            outcome,
        });
        info!(
            "🎲 {} rolled {} → case {} ({:?}) lap={}",
            account, roll, position, outcome, player.laps
        );
        Ok(RollReceipt {
            roll,
            position,
            outcome,
        })
    }

    /// True when no leg of this roll is taxed and every case effect is
    /// known to succeed, so the roll can settle on the live ledger.
    fn settles_locally(
        &self,
        token: &TaxableToken,
        account: Address,
        case: BoardCase,
    ) -> EngineResult<bool> {
        if let BoardCase::Special(SpecialEffect::Airdrop { amount }) = case {
            if !token.is_minter(self.address) {
                return Err(EngineError::Unauthorized {
                    caller: self.address,
                    action: "mint",
                });
            }
            token
                .total_supply()
                .checked_add(amount)
                .ok_or(EngineError::ArithmeticOverflow)?;
        }
        // Any non-zero rate taxes at least one unit of BPS.
        let unit = U256::from(BPS);
        let untaxed = token.tax_for(account, self.treasury, unit).is_zero()
            && token.tax_for(account, self.address, unit).is_zero()
            && token.tax_for(self.address, account, unit).is_zero();
        Ok(untaxed)
    }

    fn apply<V: LiquidityVenue + Clone>(
        &self,
        token: &mut TaxableToken,
        market: &mut Market<V>,
        registry: &NodeRegistry,
        account: Address,
        case: BoardCase,
        events: &mut Vec<Event>,
    ) -> EngineResult<(CaseOutcome, Option<PendingOffer>)> {
        let treasury_share = self.roll_fee / U256::from(2u64);
        let board_share = self.roll_fee - treasury_share;
        token.transfer_from(market, self.address, account, self.treasury, treasury_share, events)?;
        token.transfer_from(market, self.address, account, self.address, board_share, events)?;

        let retained = token.balance_of(self.address);
        let result = match case {
            BoardCase::Start => (CaseOutcome::Start, None),
            BoardCase::Neutral(FlatEffect::None) | BoardCase::Special(SpecialEffect::None) => {
                (CaseOutcome::Nothing, None)
            }
            BoardCase::Neutral(FlatEffect::Credit(x)) => {
                let paid = x.min(retained);
                token.transfer(market, self.address, account, paid, events)?;
                (CaseOutcome::Credited(paid), None)
            }
            BoardCase::Neutral(FlatEffect::Debit(x)) => {
                token.transfer_from(market, self.address, account, self.address, x, events)?;
                (CaseOutcome::Debited(x), None)
            }
            BoardCase::Special(SpecialEffect::Jackpot { share_bps }) => {
                let won = apply_bps(retained, share_bps);
                token.transfer(market, self.address, account, won, events)?;
                (CaseOutcome::Jackpot(won), None)
            }
            BoardCase::Special(SpecialEffect::Airdrop { amount }) => {
                token.mint(self.address, account, amount, events)?;
                (CaseOutcome::Airdropped(amount), None)
            }
            BoardCase::NodeOffer { node, discount_bps } => {
                let listed = registry
                    .node(node)
                    .ok_or(EngineError::UnknownType(node))?
                    .purchase_price;
                let price = apply_bps(listed, BPS - discount_bps);
                (
                    CaseOutcome::OfferMade { node, price },
                    Some(PendingOffer { node, price }),
                )
            }
        };
        debug!("case applied for {}: {:?}", account, result.0);
        Ok(result)
    }

    // ─────────────────────────────────────────────────
    // Offers
    // ─────────────────────────────────────────────────

    /// Buys the node offered by the last roll at the offered price.
    #[allow(clippy::too_many_arguments)]
    pub fn accept_offer<V: LiquidityVenue + Clone>(
        &mut self,
        token: &mut TaxableToken,
        market: &mut Market<V>,
        registry: &mut NodeRegistry,
        account: Address,
        now: u64,
        events: &mut Vec<Event>,
    ) -> EngineResult<u64> {
        let offer = self
            .pending_offer_of(account)
            .ok_or(EngineError::NoPendingOffer(account))?;
        let token_id =
            registry.purchase_node_at(token, market, account, offer.node, offer.price, now, events)?;
        if let Some(player) = self.players.get_mut(&account) {
            player.pending_offer = None;
        }
        events.push(Event::OfferAccepted {
            account,
            node: offer.node,
            price: offer.price,
        });
        info!("🤝 {} accepted offer on {} at {}", account, offer.node, offer.price);
        Ok(token_id)
    }
}
