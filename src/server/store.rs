// SPDX-FileCopyrightText: Copyright (c) 2024-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data store capability backing the bundled protocol handler.

use std::{collections::HashMap, fmt::Write as _};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::frame::{Address, Coil, Quantity, Word, MAX_READ_COIL_COUNT, MAX_READ_REGISTER_COUNT};

/// Failures a data store operation may report.
///
/// The protocol handler maps [`StoreError::InvalidQuantity`] to an
/// *Illegal data value* exception and everything else to *Server device
/// failure*.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid quantity")]
    InvalidQuantity,

    #[error(transparent)]
    Failure(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The capability the server consults to satisfy reads and writes.
///
/// There is no notion of a "missing address" on the wire: addresses a
/// backing has no value for read as the type's zero value.
#[async_trait::async_trait]
pub trait DataStore: Send + Sync {
    async fn read_coils(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Coil>>;

    async fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Coil>>;

    async fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Word>>;

    async fn read_input_registers(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Word>>;

    async fn write_single_coil(&self, addr: Address, value: Coil) -> StoreResult<()>;

    async fn write_single_register(&self, addr: Address, value: Word) -> StoreResult<()>;

    async fn write_multiple_coils(&self, addr: Address, values: &[Coil]) -> StoreResult<()>;

    async fn write_multiple_registers(&self, addr: Address, values: &[Word]) -> StoreResult<()>;
}

/// In-memory data store with one address-to-value mapping per item space.
#[derive(Debug, Default)]
pub struct MemoryStore {
    coils: RwLock<HashMap<Address, Coil>>,
    discrete_inputs: RwLock<HashMap<Address, Coil>>,
    holding_registers: RwLock<HashMap<Address, Word>>,
    input_registers: RwLock<HashMap<Address, Word>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_coil(&self, addr: Address, value: Coil) {
        self.coils.write().await.insert(addr, value);
    }

    pub async fn set_coils(&self, addr: Address, values: &[Coil]) {
        let mut coils = self.coils.write().await;
        for (i, value) in values.iter().enumerate() {
            coils.insert(addr.wrapping_add(i as u16), *value);
        }
    }

    pub async fn set_discrete_input(&self, addr: Address, value: Coil) {
        self.discrete_inputs.write().await.insert(addr, value);
    }

    pub async fn set_discrete_inputs(&self, addr: Address, values: &[Coil]) {
        let mut inputs = self.discrete_inputs.write().await;
        for (i, value) in values.iter().enumerate() {
            inputs.insert(addr.wrapping_add(i as u16), *value);
        }
    }

    pub async fn set_holding_register(&self, addr: Address, value: Word) {
        self.holding_registers.write().await.insert(addr, value);
    }

    pub async fn set_holding_registers(&self, addr: Address, values: &[Word]) {
        let mut registers = self.holding_registers.write().await;
        for (i, value) in values.iter().enumerate() {
            registers.insert(addr.wrapping_add(i as u16), *value);
        }
    }

    pub async fn set_input_register(&self, addr: Address, value: Word) {
        self.input_registers.write().await.insert(addr, value);
    }

    pub async fn set_input_registers(&self, addr: Address, values: &[Word]) {
        let mut registers = self.input_registers.write().await;
        for (i, value) in values.iter().enumerate() {
            registers.insert(addr.wrapping_add(i as u16), *value);
        }
    }

    /// Human-readable listing of every populated address.
    pub async fn dump(&self) -> String {
        let mut out = String::new();
        let coils = self.coils.read().await;
        let discrete_inputs = self.discrete_inputs.read().await;
        let holding_registers = self.holding_registers.read().await;
        let input_registers = self.input_registers.read().await;

        let mut bit_space = |name: &str, map: &HashMap<Address, Coil>| {
            let _ = writeln!(out, "{name} ({}):", map.len());
            let mut addrs: Vec<_> = map.keys().copied().collect();
            addrs.sort_unstable();
            for addr in addrs {
                let _ = writeln!(out, "  {addr:5}: {}", u8::from(map[&addr]));
            }
        };
        bit_space("coils", &coils);
        bit_space("discrete inputs", &discrete_inputs);

        let mut word_space = |name: &str, map: &HashMap<Address, Word>| {
            let _ = writeln!(out, "{name} ({}):", map.len());
            let mut addrs: Vec<_> = map.keys().copied().collect();
            addrs.sort_unstable();
            for addr in addrs {
                let _ = writeln!(out, "  {addr:5}: 0x{:04X}", map[&addr]);
            }
        };
        word_space("holding registers", &holding_registers);
        word_space("input registers", &input_registers);

        out
    }
}

fn check_read_quantity(cnt: Quantity, max: Quantity) -> StoreResult<()> {
    if cnt == 0 || cnt > max {
        return Err(StoreError::InvalidQuantity);
    }
    Ok(())
}

fn read_bits(map: &HashMap<Address, Coil>, addr: Address, cnt: Quantity) -> Vec<Coil> {
    (0..cnt)
        .map(|i| map.get(&addr.wrapping_add(i)).copied().unwrap_or(false))
        .collect()
}

fn read_words(map: &HashMap<Address, Word>, addr: Address, cnt: Quantity) -> Vec<Word> {
    (0..cnt)
        .map(|i| map.get(&addr.wrapping_add(i)).copied().unwrap_or(0))
        .collect()
}

#[async_trait::async_trait]
impl DataStore for MemoryStore {
    async fn read_coils(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Coil>> {
        check_read_quantity(cnt, MAX_READ_COIL_COUNT)?;
        Ok(read_bits(&*self.coils.read().await, addr, cnt))
    }

    async fn read_discrete_inputs(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Coil>> {
        check_read_quantity(cnt, MAX_READ_COIL_COUNT)?;
        Ok(read_bits(&*self.discrete_inputs.read().await, addr, cnt))
    }

    async fn read_holding_registers(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Word>> {
        check_read_quantity(cnt, MAX_READ_REGISTER_COUNT)?;
        Ok(read_words(&*self.holding_registers.read().await, addr, cnt))
    }

    async fn read_input_registers(&self, addr: Address, cnt: Quantity) -> StoreResult<Vec<Word>> {
        check_read_quantity(cnt, MAX_READ_REGISTER_COUNT)?;
        Ok(read_words(&*self.input_registers.read().await, addr, cnt))
    }

    async fn write_single_coil(&self, addr: Address, value: Coil) -> StoreResult<()> {
        self.coils.write().await.insert(addr, value);
        Ok(())
    }

    async fn write_single_register(&self, addr: Address, value: Word) -> StoreResult<()> {
        self.holding_registers.write().await.insert(addr, value);
        Ok(())
    }

    async fn write_multiple_coils(&self, addr: Address, values: &[Coil]) -> StoreResult<()> {
        if values.is_empty() {
            return Err(StoreError::InvalidQuantity);
        }
        let mut coils = self.coils.write().await;
        for (i, value) in values.iter().enumerate() {
            coils.insert(addr.wrapping_add(i as u16), *value);
        }
        Ok(())
    }

    async fn write_multiple_registers(&self, addr: Address, values: &[Word]) -> StoreResult<()> {
        if values.is_empty() {
            return Err(StoreError::InvalidQuantity);
        }
        let mut registers = self.holding_registers.write().await;
        for (i, value) in values.iter().enumerate() {
            registers.insert(addr.wrapping_add(i as u16), *value);
        }
        Ok(())
    }
}
