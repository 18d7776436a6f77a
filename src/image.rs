// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory process image
//!
//! The process image holds the addressable data of one or more served
//! units: coils, discrete inputs, input registers, holding registers,
//! file records and FIFO queues. Request handling routes every function
//! code against these banks with the range and count checks the protocol
//! prescribes, and notifies registered observers after successful writes.

use std::{
    collections::{HashMap, VecDeque},
    sync::{PoisonError, RwLock},
};

use crate::{
    bits::BitVector,
    codec::MAX_FIFO_COUNT,
    frame::{
        Address, Coil, DeviceId, DeviceIdObject, Exception, FileRecordData, FileWrite,
        FunctionCode, Quantity, Request, Response, Word,
    },
    unit::UnitId,
};

/// A change notification emitted after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    pub unit: UnitId,
    pub address: Address,
    pub function: FunctionCode,
    /// The written value; coil states are reported as `0x0000`/`0xFF00`.
    pub value: Word,
}

type Observer = Box<dyn Fn(&WriteEvent) + Send + Sync>;

/// Bank sizes of a unit image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitLayout {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub input_registers: usize,
    pub holding_registers: usize,
}

impl UnitLayout {
    /// All four banks with the same number of addressable items.
    #[must_use]
    pub const fn uniform(len: usize) -> Self {
        Self {
            coils: len,
            discrete_inputs: len,
            input_registers: len,
            holding_registers: len,
        }
    }
}

/// The addressable data of one unit.
#[derive(Debug)]
pub struct UnitImage {
    coils: BitVector,
    discrete_inputs: BitVector,
    input_registers: Vec<Word>,
    holding_registers: Vec<Word>,
    files: HashMap<u16, Vec<Word>>,
    fifos: HashMap<Address, VecDeque<Word>>,
    device_id: Vec<DeviceIdObject>,
}

impl UnitImage {
    #[must_use]
    pub fn new(layout: UnitLayout) -> Self {
        Self {
            coils: BitVector::new(layout.coils),
            discrete_inputs: BitVector::new(layout.discrete_inputs),
            input_registers: vec![0; layout.input_registers],
            holding_registers: vec![0; layout.holding_registers],
            files: HashMap::new(),
            fifos: HashMap::new(),
            device_id: Vec::new(),
        }
    }

    fn addressable(len: usize, address: Address) -> crate::error::Result<usize> {
        let index = usize::from(address);
        if index >= len {
            return Err(crate::error::Error::IllegalAddress {
                address,
                quantity: 1,
            });
        }
        Ok(index)
    }

    pub fn set_coil(&mut self, address: Address, state: Coil) -> crate::error::Result<()> {
        let index = Self::addressable(self.coils.len(), address)?;
        self.coils.set(index, state);
        Ok(())
    }

    pub fn coil(&self, address: Address) -> crate::error::Result<Coil> {
        let index = Self::addressable(self.coils.len(), address)?;
        Ok(self.coils.get(index))
    }

    pub fn set_discrete_input(&mut self, address: Address, state: Coil) -> crate::error::Result<()> {
        let index = Self::addressable(self.discrete_inputs.len(), address)?;
        self.discrete_inputs.set(index, state);
        Ok(())
    }

    pub fn set_input_register(&mut self, address: Address, value: Word) -> crate::error::Result<()> {
        let index = Self::addressable(self.input_registers.len(), address)?;
        self.input_registers[index] = value;
        Ok(())
    }

    pub fn set_holding_register(
        &mut self,
        address: Address,
        value: Word,
    ) -> crate::error::Result<()> {
        let index = Self::addressable(self.holding_registers.len(), address)?;
        self.holding_registers[index] = value;
        Ok(())
    }

    pub fn holding_register(&self, address: Address) -> crate::error::Result<Word> {
        let index = Self::addressable(self.holding_registers.len(), address)?;
        Ok(self.holding_registers[index])
    }

    /// Create or replace a record file of `len` 16 bit records.
    pub fn insert_file(&mut self, file_number: u16, len: usize) {
        self.files.insert(file_number, vec![0; len]);
    }

    /// Create or replace the FIFO queue behind a pointer address.
    pub fn insert_fifo(&mut self, address: Address) {
        self.fifos.insert(address, VecDeque::new());
    }

    /// Append a value to a FIFO queue.
    pub fn push_fifo(&mut self, address: Address, value: Word) -> crate::error::Result<()> {
        let Some(fifo) = self.fifos.get_mut(&address) else {
            return Err(crate::error::Error::IllegalAddress {
                address,
                quantity: 1,
            });
        };
        fifo.push_back(value);
        Ok(())
    }

    /// Replace the device identification objects.
    pub fn set_device_id(&mut self, objects: Vec<DeviceIdObject>) {
        self.device_id = objects;
    }

    fn check_bit_range(len: usize, address: Address, quantity: Quantity) -> Result<(), Exception> {
        if quantity == 0 || usize::from(quantity) > 2000 {
            return Err(Exception::IllegalDataValue);
        }
        Self::check_range(len, address, quantity)
    }

    fn check_word_range(len: usize, address: Address, quantity: Quantity) -> Result<(), Exception> {
        if quantity == 0 || quantity > 125 {
            return Err(Exception::IllegalDataValue);
        }
        Self::check_range(len, address, quantity)
    }

    /// The whole range must lie within the allocated bank.
    fn check_range(len: usize, address: Address, quantity: Quantity) -> Result<(), Exception> {
        let end = usize::from(address) + usize::from(quantity);
        if end > len {
            return Err(Exception::IllegalDataAddress);
        }
        Ok(())
    }

    fn read_coils(&self, address: Address, quantity: Quantity) -> Result<Vec<Coil>, Exception> {
        Self::check_bit_range(self.coils.len(), address, quantity)?;
        Ok((0..usize::from(quantity))
            .map(|i| self.coils.get(usize::from(address) + i))
            .collect())
    }

    fn read_discrete_inputs(
        &self,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Coil>, Exception> {
        Self::check_bit_range(self.discrete_inputs.len(), address, quantity)?;
        Ok((0..usize::from(quantity))
            .map(|i| self.discrete_inputs.get(usize::from(address) + i))
            .collect())
    }

    fn read_input_registers(
        &self,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Word>, Exception> {
        Self::check_word_range(self.input_registers.len(), address, quantity)?;
        let start = usize::from(address);
        Ok(self.input_registers[start..start + usize::from(quantity)].to_vec())
    }

    fn read_holding_registers(
        &self,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<Word>, Exception> {
        Self::check_word_range(self.holding_registers.len(), address, quantity)?;
        let start = usize::from(address);
        Ok(self.holding_registers[start..start + usize::from(quantity)].to_vec())
    }

    fn write_coils(&mut self, address: Address, states: &[Coil]) -> Result<(), Exception> {
        if states.is_empty() || states.len() > 1968 {
            return Err(Exception::IllegalDataValue);
        }
        let quantity = u16::try_from(states.len()).map_err(|_| Exception::IllegalDataValue)?;
        Self::check_range(self.coils.len(), address, quantity)?;
        for (i, state) in states.iter().enumerate() {
            self.coils.set(usize::from(address) + i, *state);
        }
        Ok(())
    }

    fn write_registers(&mut self, address: Address, words: &[Word]) -> Result<(), Exception> {
        if words.is_empty() || words.len() > 123 {
            return Err(Exception::IllegalDataValue);
        }
        let quantity = u16::try_from(words.len()).map_err(|_| Exception::IllegalDataValue)?;
        Self::check_range(self.holding_registers.len(), address, quantity)?;
        let start = usize::from(address);
        self.holding_registers[start..start + words.len()].copy_from_slice(words);
        Ok(())
    }

    fn read_file_record(
        &self,
        records: &[crate::frame::FileRecord],
    ) -> Result<Vec<FileRecordData>, Exception> {
        // The response must fit one PDU.
        let response_len: usize = records.iter().map(|r| 2 + usize::from(r.length) * 2).sum();
        if records.is_empty() || response_len + 2 > 253 {
            return Err(Exception::IllegalDataValue);
        }
        records
            .iter()
            .map(|record| {
                let file = self
                    .files
                    .get(&record.file_number)
                    .ok_or(Exception::IllegalDataAddress)?;
                let start = usize::from(record.record_number);
                let end = start + usize::from(record.length);
                if end > file.len() {
                    return Err(Exception::IllegalDataAddress);
                }
                Ok(FileRecordData {
                    data: file[start..end].to_vec(),
                })
            })
            .collect()
    }

    fn write_file_record(&mut self, writes: &[FileWrite]) -> Result<(), Exception> {
        if writes.is_empty() {
            return Err(Exception::IllegalDataValue);
        }
        // Validate all sub-requests up front so the write is atomic.
        for write in writes {
            let file = self
                .files
                .get(&write.file_number)
                .ok_or(Exception::IllegalDataAddress)?;
            let start = usize::from(write.record_number);
            if start + write.data.len() > file.len() {
                return Err(Exception::IllegalDataAddress);
            }
        }
        for write in writes {
            let file = self
                .files
                .get_mut(&write.file_number)
                .ok_or(Exception::IllegalDataAddress)?;
            let start = usize::from(write.record_number);
            file[start..start + write.data.len()].copy_from_slice(&write.data);
        }
        Ok(())
    }

    fn read_fifo_queue(&self, address: Address) -> Result<Vec<Word>, Exception> {
        let fifo = self
            .fifos
            .get(&address)
            .ok_or(Exception::IllegalDataAddress)?;
        if fifo.len() > usize::from(MAX_FIFO_COUNT) {
            return Err(Exception::IllegalDataValue);
        }
        Ok(fifo.iter().copied().collect())
    }

    fn read_device_identification(
        &self,
        read_code: u8,
        object_id: u8,
    ) -> Result<DeviceId, Exception> {
        match read_code {
            // Stream access starting at the requested object.
            0x01..=0x03 => {
                let objects: Vec<_> = self
                    .device_id
                    .iter()
                    .filter(|object| object.id >= object_id)
                    .cloned()
                    .collect();
                Ok(DeviceId {
                    read_code,
                    conformity_level: 0x81,
                    more_follows: false,
                    next_object_id: 0,
                    objects,
                })
            }
            // Individual access to one specific object.
            0x04 => {
                let object = self
                    .device_id
                    .iter()
                    .find(|object| object.id == object_id)
                    .cloned()
                    .ok_or(Exception::IllegalDataAddress)?;
                Ok(DeviceId {
                    read_code,
                    conformity_level: 0x81,
                    more_follows: false,
                    next_object_id: 0,
                    objects: vec![object],
                })
            }
            _ => Err(Exception::IllegalDataValue),
        }
    }
}

/// The process image of a server: one [`UnitImage`] per served unit.
///
/// Units are partitioned behind individual reader-writer locks so that
/// traffic for one unit never contends with another. Locks are only held
/// for the synchronous part of request handling, never across await
/// points, and observers run after the write lock is released.
#[derive(Default)]
pub struct ProcessImage {
    units: HashMap<UnitId, RwLock<UnitImage>>,
    observers: Vec<Observer>,
}

impl std::fmt::Debug for ProcessImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessImage")
            .field("units", &self.units)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ProcessImage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the image of one unit.
    pub fn insert_unit(&mut self, unit: UnitId, image: UnitImage) {
        self.units.insert(unit, RwLock::new(image));
    }

    /// Whether this image serves the given unit.
    #[must_use]
    pub fn serves_unit(&self, unit: UnitId) -> bool {
        self.units.contains_key(&unit)
    }

    /// Register a change observer.
    ///
    /// Observers run on the handler task after a write completed and its
    /// lock is released; they must not block.
    pub fn observe(&mut self, observer: impl Fn(&WriteEvent) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Run a read closure against the image of one unit.
    pub fn with_unit<R>(&self, unit: UnitId, f: impl FnOnce(&UnitImage) -> R) -> Option<R> {
        let bank = self.units.get(&unit)?;
        let bank = bank.read().unwrap_or_else(PoisonError::into_inner);
        Some(f(&bank))
    }

    /// Run a write closure against the image of one unit.
    ///
    /// This bypasses request handling and does not notify observers; it
    /// is meant for seeding and local (server-side) updates.
    pub fn with_unit_mut<R>(&self, unit: UnitId, f: impl FnOnce(&mut UnitImage) -> R) -> Option<R> {
        let bank = self.units.get(&unit)?;
        let mut bank = bank.write().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut bank))
    }

    /// Route one decoded request against the image.
    ///
    /// Writes are applied atomically per request: the unit's write lock
    /// is held until every item of the request has been stored.
    pub fn handle(&self, unit: UnitId, request: Request) -> Result<Response, Exception> {
        let Some(bank) = self.units.get(&unit) else {
            return Err(Exception::GatewayPathUnavailable);
        };

        let function = request.function_code();
        let mut events = Vec::new();

        let response = match request {
            Request::ReadCoils(address, quantity) => {
                let bank = bank.read().unwrap_or_else(PoisonError::into_inner);
                Response::ReadCoils(bank.read_coils(address, quantity)?)
            }
            Request::ReadDiscreteInputs(address, quantity) => {
                let bank = bank.read().unwrap_or_else(PoisonError::into_inner);
                Response::ReadDiscreteInputs(bank.read_discrete_inputs(address, quantity)?)
            }
            Request::ReadInputRegisters(address, quantity) => {
                let bank = bank.read().unwrap_or_else(PoisonError::into_inner);
                Response::ReadInputRegisters(bank.read_input_registers(address, quantity)?)
            }
            Request::ReadHoldingRegisters(address, quantity) => {
                let bank = bank.read().unwrap_or_else(PoisonError::into_inner);
                Response::ReadHoldingRegisters(bank.read_holding_registers(address, quantity)?)
            }
            Request::WriteSingleCoil(address, state) => {
                let mut bank = bank.write().unwrap_or_else(PoisonError::into_inner);
                UnitImage::check_range(bank.coils.len(), address, 1)?;
                bank.coils.set(usize::from(address), state);
                events.push(WriteEvent {
                    unit,
                    address,
                    function,
                    value: if state { 0xFF00 } else { 0x0000 },
                });
                Response::WriteSingleCoil(address, state)
            }
            Request::WriteSingleRegister(address, value) => {
                let mut bank = bank.write().unwrap_or_else(PoisonError::into_inner);
                UnitImage::check_range(bank.holding_registers.len(), address, 1)?;
                bank.holding_registers[usize::from(address)] = value;
                events.push(WriteEvent {
                    unit,
                    address,
                    function,
                    value,
                });
                Response::WriteSingleRegister(address, value)
            }
            Request::WriteMultipleCoils(address, states) => {
                let mut bank = bank.write().unwrap_or_else(PoisonError::into_inner);
                bank.write_coils(address, &states)?;
                for (i, state) in states.iter().enumerate() {
                    events.push(WriteEvent {
                        unit,
                        address: address.wrapping_add(u16::try_from(i).unwrap_or(u16::MAX)),
                        function,
                        value: if *state { 0xFF00 } else { 0x0000 },
                    });
                }
                Response::WriteMultipleCoils(
                    address,
                    u16::try_from(states.len()).unwrap_or(u16::MAX),
                )
            }
            Request::WriteMultipleRegisters(address, words) => {
                let mut bank = bank.write().unwrap_or_else(PoisonError::into_inner);
                bank.write_registers(address, &words)?;
                for (i, value) in words.iter().enumerate() {
                    events.push(WriteEvent {
                        unit,
                        address: address.wrapping_add(u16::try_from(i).unwrap_or(u16::MAX)),
                        function,
                        value: *value,
                    });
                }
                Response::WriteMultipleRegisters(
                    address,
                    u16::try_from(words.len()).unwrap_or(u16::MAX),
                )
            }
            Request::MaskWriteRegister(address, and_mask, or_mask) => {
                let mut bank = bank.write().unwrap_or_else(PoisonError::into_inner);
                UnitImage::check_range(bank.holding_registers.len(), address, 1)?;
                let current = bank.holding_registers[usize::from(address)];
                let value = (current & and_mask) | (or_mask & !and_mask);
                bank.holding_registers[usize::from(address)] = value;
                events.push(WriteEvent {
                    unit,
                    address,
                    function,
                    value,
                });
                Response::MaskWriteRegister(address, and_mask, or_mask)
            }
            Request::ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words) => {
                let mut bank = bank.write().unwrap_or_else(PoisonError::into_inner);
                if words.is_empty() || words.len() > 121 {
                    return Err(Exception::IllegalDataValue);
                }
                // The write is performed before the read.
                bank.write_registers(write_address, &words)?;
                let read = bank.read_holding_registers(read_address, read_quantity)?;
                for (i, value) in words.iter().enumerate() {
                    events.push(WriteEvent {
                        unit,
                        address: write_address.wrapping_add(u16::try_from(i).unwrap_or(u16::MAX)),
                        function,
                        value: *value,
                    });
                }
                Response::ReadWriteMultipleRegisters(read)
            }
            Request::ReadFileRecord(records) => {
                let bank = bank.read().unwrap_or_else(PoisonError::into_inner);
                Response::ReadFileRecord(bank.read_file_record(&records)?)
            }
            Request::WriteFileRecord(writes) => {
                let mut bank = bank.write().unwrap_or_else(PoisonError::into_inner);
                bank.write_file_record(&writes)?;
                for write in &writes {
                    for (i, value) in write.data.iter().enumerate() {
                        events.push(WriteEvent {
                            unit,
                            address: write.record_number.wrapping_add(u16::try_from(i).unwrap_or(u16::MAX)),
                            function,
                            value: *value,
                        });
                    }
                }
                Response::WriteFileRecord(writes)
            }
            Request::ReadFifoQueue(address) => {
                let bank = bank.read().unwrap_or_else(PoisonError::into_inner);
                Response::ReadFifoQueue(bank.read_fifo_queue(address)?)
            }
            Request::ReadDeviceIdentification(read_code, object_id) => {
                let bank = bank.read().unwrap_or_else(PoisonError::into_inner);
                Response::ReadDeviceIdentification(
                    bank.read_device_identification(read_code, object_id)?,
                )
            }
            Request::Custom(function, _) => {
                log::debug!("Rejecting unsupported function code 0x{function:0>2X}");
                return Err(Exception::IllegalFunction);
            }
        };

        // Locks are released here; observers must not be able to stall
        // request handling of other connections.
        for observer in &self.observers {
            for event in &events {
                observer(event);
            }
        }

        Ok(response)
    }
}
