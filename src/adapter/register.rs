//! Register front end: the field table laid out as Modbus holding registers.
//!
//! | address | content                        | access |
//! |---------|--------------------------------|--------|
//! | 0       | firmware version major         | R      |
//! | 1       | firmware version minor         | R      |
//! | 2       | uptime in seconds (mod 65536)  | R      |
//! | 30      | CPU temperature, °C × 10       | R      |
//! | 31      | high threshold, °C × 10        | R/W    |
//! | 32      | low threshold, °C × 10         | R/W    |
//! | 33      | overheat status (0/1)          | R      |
//! | 34      | fan status (0/1)               | R      |
//! | 35      | manual override (0/1)          | R/W    |
//!
//! The block spans addresses `0..100`. Unmapped addresses inside it read as 0.

use super::{FieldGateway, Protocol, ProtocolAdapter};
use crate::access::Rejection;
use crate::auth::Identity;
use crate::fields::{FieldId, RawValue};
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

pub const REG_VERSION_MAJOR: u16 = 0;
pub const REG_VERSION_MINOR: u16 = 1;
pub const REG_UPTIME: u16 = 2;
pub const REG_CPU_TEMPERATURE: u16 = 30;
pub const REG_HIGH_THRESHOLD: u16 = 31;
pub const REG_LOW_THRESHOLD: u16 = 32;
pub const REG_OVERHEAT_STATUS: u16 = 33;
pub const REG_FAN_STATUS: u16 = 34;
pub const REG_MANUAL_OVERRIDE: u16 = 35;

pub const REGISTER_SPACE: u16 = 100;
pub const MAX_READ_REGISTERS: usize = 125;
pub const MAX_WRITE_REGISTERS: usize = 123;

pub const FIRMWARE_VERSION: (u16, u16) = (1, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterSlot {
    Constant(u16),
    Field(FieldId),
}

/// What lives at `address`; `None` for unmapped or out-of-block addresses.
pub fn slot(address: u16) -> Option<RegisterSlot> {
    let slot = match address {
        REG_VERSION_MAJOR => RegisterSlot::Constant(FIRMWARE_VERSION.0),
        REG_VERSION_MINOR => RegisterSlot::Constant(FIRMWARE_VERSION.1),
        REG_UPTIME => RegisterSlot::Field(FieldId::Uptime),
        REG_CPU_TEMPERATURE => RegisterSlot::Field(FieldId::CpuTemperature),
        REG_HIGH_THRESHOLD => RegisterSlot::Field(FieldId::HighThreshold),
        REG_LOW_THRESHOLD => RegisterSlot::Field(FieldId::LowThreshold),
        REG_OVERHEAT_STATUS => RegisterSlot::Field(FieldId::OverheatStatus),
        REG_FAN_STATUS => RegisterSlot::Field(FieldId::FanStatus),
        REG_MANUAL_OVERRIDE => RegisterSlot::Field(FieldId::ManualOverride),
        _ => return None,
    };
    Some(slot)
}

pub fn register_of(field: FieldId) -> u16 {
    match field {
        FieldId::CpuTemperature => REG_CPU_TEMPERATURE,
        FieldId::HighThreshold => REG_HIGH_THRESHOLD,
        FieldId::LowThreshold => REG_LOW_THRESHOLD,
        FieldId::OverheatStatus => REG_OVERHEAT_STATUS,
        FieldId::FanStatus => REG_FAN_STATUS,
        FieldId::ManualOverride => REG_MANUAL_OVERRIDE,
        FieldId::Uptime => REG_UPTIME,
    }
}

/// Modbus exception responses this front end produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RegisterException {
    #[error("illegal function")]
    IllegalFunction,
    #[error("illegal data address")]
    IllegalDataAddress,
    #[error("illegal data value")]
    IllegalDataValue,
}

impl RegisterException {
    pub fn code(self) -> u8 {
        match self {
            RegisterException::IllegalFunction => 0x01,
            RegisterException::IllegalDataAddress => 0x02,
            RegisterException::IllegalDataValue => 0x03,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterRequest {
    ReadHoldingRegisters { address: u16, count: u16 },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterResponse {
    ReadHoldingRegisters(ArrayVec<u16, MAX_READ_REGISTERS>),
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, count: u16 },
}

#[derive(Debug, Clone)]
pub struct RegisterAdapter {
    gateway: FieldGateway,
}

impl RegisterAdapter {
    pub fn new(gateway: FieldGateway) -> Self {
        debug_assert_eq!(gateway.protocol(), Protocol::Register);
        Self { gateway }
    }

    pub fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<ArrayVec<u16, MAX_READ_REGISTERS>, RegisterException> {
        if count == 0 || usize::from(count) > MAX_READ_REGISTERS {
            return Err(RegisterException::IllegalDataValue);
        }
        let end = u32::from(address) + u32::from(count);
        if end > u32::from(REGISTER_SPACE) {
            return Err(RegisterException::IllegalDataAddress);
        }

        let snapshot = self.gateway.read_snapshot();
        let mut words = ArrayVec::new();
        for addr in address..address + count {
            let word = match slot(addr) {
                Some(RegisterSlot::Constant(value)) => value,
                Some(RegisterSlot::Field(field)) => snapshot.get(field).to_register(),
                None => 0,
            };
            words.push(word);
        }
        Ok(words)
    }

    pub fn write_single_register(
        &self,
        identity: &Identity,
        address: u16,
        value: u16,
    ) -> Result<(), RegisterException> {
        let field = self.writable_field(identity, address)?;
        self.gateway
            .write(identity, field, RawValue::Register(value))
            .map(|_| ())
            .map_err(Self::map_rejection)
    }

    /// All-or-nothing across the whole register range.
    pub fn write_multiple_registers(
        &self,
        identity: &Identity,
        address: u16,
        values: &[u16],
    ) -> Result<(), RegisterException> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
            return Err(RegisterException::IllegalDataValue);
        }
        let end = u32::from(address) + values.len() as u32;
        if end > u32::from(REGISTER_SPACE) {
            return Err(RegisterException::IllegalDataAddress);
        }

        let mut entries = Vec::with_capacity(values.len());
        for (addr, value) in (address..).zip(values) {
            let field = self.writable_field(identity, addr)?;
            entries.push((field, RawValue::Register(*value)));
        }
        self.gateway
            .write_batch(identity, &entries)
            .map(|_| ())
            .map_err(|rejected| Self::map_rejection(rejected.rejection))
    }

    /// Resolve a write target, rejecting constants and holes before the mediator sees them.
    fn writable_field(&self, identity: &Identity, address: u16) -> Result<FieldId, RegisterException> {
        match slot(address) {
            Some(RegisterSlot::Field(field)) => Ok(field),
            Some(RegisterSlot::Constant(_)) => {
                let rejection = Rejection::ReadOnlyViolation;
                self.gateway
                    .record_rejection(identity, &format!("register {address}"), rejection);
                Err(Self::map_rejection(rejection))
            }
            None => {
                let rejection = Rejection::UnknownField;
                self.gateway
                    .record_rejection(identity, &format!("register {address}"), rejection);
                Err(Self::map_rejection(rejection))
            }
        }
    }
}

impl ProtocolAdapter for RegisterAdapter {
    type Request = RegisterRequest;
    type Response = RegisterResponse;
    type Error = RegisterException;
    type Status = RegisterException;

    const PROTOCOL: Protocol = Protocol::Register;

    fn gateway(&self) -> &FieldGateway {
        &self.gateway
    }

    fn map_rejection(rejection: Rejection) -> RegisterException {
        match rejection {
            Rejection::UnknownField => RegisterException::IllegalDataAddress,
            Rejection::ReadOnlyViolation | Rejection::PermissionDenied => {
                RegisterException::IllegalFunction
            }
            Rejection::OutOfRange
            | Rejection::InvalidEnum
            | Rejection::TypeMismatch
            | Rejection::BatchTooLarge => RegisterException::IllegalDataValue,
        }
    }

    fn handle(
        &self,
        identity: &Identity,
        request: RegisterRequest,
    ) -> Result<RegisterResponse, RegisterException> {
        match request {
            RegisterRequest::ReadHoldingRegisters { address, count } => self
                .read_holding_registers(address, count)
                .map(RegisterResponse::ReadHoldingRegisters),
            RegisterRequest::WriteSingleRegister { address, value } => {
                self.write_single_register(identity, address, value)?;
                Ok(RegisterResponse::WriteSingleRegister { address, value })
            }
            RegisterRequest::WriteMultipleRegisters { address, values } => {
                self.write_multiple_registers(identity, address, &values)?;
                Ok(RegisterResponse::WriteMultipleRegisters {
                    address,
                    count: values.len() as u16,
                })
            }
        }
    }
}
