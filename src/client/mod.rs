// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Master-side API

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "udp")]
pub mod udp;

use std::fmt;

use crate::{
    error::{Error, Result},
    frame::{
        Address, Coil, DeviceId, FileRecord, FileRecordData, FileWrite, Quantity, Request,
        Response, Word,
    },
    unit::{Unit, UnitContext},
};

/// A transport independent asynchronous client trait.
#[async_trait::async_trait]
pub trait Client: UnitContext + fmt::Debug + Send {
    /// Invoke a Modbus function and await the matching response.
    ///
    /// Exception responses surface as [`Error::Exception`]; from the
    /// transport's point of view they complete the transaction.
    async fn call(&mut self, request: Request) -> Result<Response>;

    /// Release the underlying transport.
    async fn disconnect(&mut self) -> Result<()>;
}

/// An asynchronous Modbus client context.
pub struct Context {
    client: Box<dyn Client>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("client", &self.client)
            .finish()
    }
}

impl Context {
    /// Invoke a Modbus function and await the matching response.
    pub async fn call(&mut self, request: Request) -> Result<Response> {
        self.client.call(request).await
    }

    /// Release the underlying transport.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect().await
    }
}

impl From<Box<dyn Client>> for Context {
    fn from(client: Box<dyn Client>) -> Self {
        Self { client }
    }
}

impl From<Context> for Box<dyn Client> {
    fn from(context: Context) -> Self {
        context.client
    }
}

#[async_trait::async_trait]
impl Client for Context {
    async fn call(&mut self, request: Request) -> Result<Response> {
        self.client.call(request).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client.disconnect().await
    }
}

impl UnitContext for Context {
    fn set_unit(&mut self, unit: Unit) {
        self.client.set_unit(unit);
    }
}

fn unexpected_response(request: &Request, response: &Response) -> Error {
    Error::ProtocolMismatch {
        expected: u16::from(request.function_code()),
        actual: u16::from(response.function_code()),
    }
}

fn invalid_response_length(expected: usize, actual: usize) -> Error {
    Error::ProtocolMismatch {
        expected: u16::try_from(expected).unwrap_or(u16::MAX),
        actual: u16::try_from(actual).unwrap_or(u16::MAX),
    }
}

/// An asynchronous Modbus reader.
#[async_trait::async_trait]
pub trait Reader: Client {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>>;

    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>>;

    async fn read_file_record(&mut self, records: &[FileRecord]) -> Result<Vec<FileRecordData>>;

    async fn read_fifo_queue(&mut self, addr: Address) -> Result<Vec<Word>>;

    async fn read_device_identification(
        &mut self,
        read_code: u8,
        object_id: u8,
    ) -> Result<DeviceId>;
}

/// An asynchronous Modbus writer.
#[async_trait::async_trait]
pub trait Writer: Client {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()>;

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()>;

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;

    async fn masked_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()>;

    async fn write_file_record(&mut self, writes: &[FileWrite]) -> Result<()>;
}

#[async_trait::async_trait]
impl Reader for Context {
    async fn read_coils(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        let request = Request::ReadCoils(addr, cnt);
        let rsp = self.client.call(request.clone()).await?;
        if let Response::ReadCoils(mut coils) = rsp {
            if coils.len() < cnt as usize {
                return Err(invalid_response_length(cnt as usize, coils.len()));
            }
            coils.truncate(cnt as usize);
            Ok(coils)
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn read_discrete_inputs(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Coil>> {
        let request = Request::ReadDiscreteInputs(addr, cnt);
        let rsp = self.client.call(request.clone()).await?;
        if let Response::ReadDiscreteInputs(mut coils) = rsp {
            if coils.len() < cnt as usize {
                return Err(invalid_response_length(cnt as usize, coils.len()));
            }
            coils.truncate(cnt as usize);
            Ok(coils)
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn read_input_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        let request = Request::ReadInputRegisters(addr, cnt);
        let rsp = self.client.call(request.clone()).await?;
        if let Response::ReadInputRegisters(words) = rsp {
            if words.len() != cnt as usize {
                return Err(invalid_response_length(cnt as usize, words.len()));
            }
            Ok(words)
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        let request = Request::ReadHoldingRegisters(addr, cnt);
        let rsp = self.client.call(request.clone()).await?;
        if let Response::ReadHoldingRegisters(words) = rsp {
            if words.len() != cnt as usize {
                return Err(invalid_response_length(cnt as usize, words.len()));
            }
            Ok(words)
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn read_write_multiple_registers(
        &mut self,
        read_addr: Address,
        read_cnt: Quantity,
        write_addr: Address,
        write_data: &[Word],
    ) -> Result<Vec<Word>> {
        let request = Request::ReadWriteMultipleRegisters(
            read_addr,
            read_cnt,
            write_addr,
            write_data.to_vec(),
        );
        let rsp = self.client.call(request.clone()).await?;
        if let Response::ReadWriteMultipleRegisters(words) = rsp {
            if words.len() != read_cnt as usize {
                return Err(invalid_response_length(read_cnt as usize, words.len()));
            }
            Ok(words)
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn read_file_record(&mut self, records: &[FileRecord]) -> Result<Vec<FileRecordData>> {
        let request = Request::ReadFileRecord(records.to_vec());
        let rsp = self.client.call(request.clone()).await?;
        if let Response::ReadFileRecord(data) = rsp {
            if data.len() != records.len() {
                return Err(invalid_response_length(records.len(), data.len()));
            }
            Ok(data)
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn read_fifo_queue(&mut self, addr: Address) -> Result<Vec<Word>> {
        let request = Request::ReadFifoQueue(addr);
        let rsp = self.client.call(request.clone()).await?;
        if let Response::ReadFifoQueue(words) = rsp {
            Ok(words)
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn read_device_identification(
        &mut self,
        read_code: u8,
        object_id: u8,
    ) -> Result<DeviceId> {
        let request = Request::ReadDeviceIdentification(read_code, object_id);
        let rsp = self.client.call(request.clone()).await?;
        if let Response::ReadDeviceIdentification(device_id) = rsp {
            Ok(device_id)
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }
}

#[async_trait::async_trait]
impl Writer for Context {
    async fn write_single_coil(&mut self, addr: Address, coil: Coil) -> Result<()> {
        let request = Request::WriteSingleCoil(addr, coil);
        let rsp = self.client.call(request.clone()).await?;
        if let Response::WriteSingleCoil(rsp_addr, rsp_coil) = rsp {
            if rsp_addr != addr || rsp_coil != coil {
                return Err(Error::ProtocolMismatch {
                    expected: addr,
                    actual: rsp_addr,
                });
            }
            Ok(())
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn write_multiple_coils(&mut self, addr: Address, coils: &[Coil]) -> Result<()> {
        let cnt = coils.len();
        let request = Request::WriteMultipleCoils(addr, coils.to_vec());
        let rsp = self.client.call(request.clone()).await?;
        if let Response::WriteMultipleCoils(rsp_addr, rsp_cnt) = rsp {
            if rsp_addr != addr || rsp_cnt as usize != cnt {
                return Err(Error::ProtocolMismatch {
                    expected: addr,
                    actual: rsp_addr,
                });
            }
            Ok(())
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        let request = Request::WriteSingleRegister(addr, word);
        let rsp = self.client.call(request.clone()).await?;
        if let Response::WriteSingleRegister(rsp_addr, rsp_word) = rsp {
            if rsp_addr != addr || rsp_word != word {
                return Err(Error::ProtocolMismatch {
                    expected: addr,
                    actual: rsp_addr,
                });
            }
            Ok(())
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        let cnt = words.len();
        let request = Request::WriteMultipleRegisters(addr, words.to_vec());
        let rsp = self.client.call(request.clone()).await?;
        if let Response::WriteMultipleRegisters(rsp_addr, rsp_cnt) = rsp {
            if rsp_addr != addr || rsp_cnt as usize != cnt {
                return Err(Error::ProtocolMismatch {
                    expected: addr,
                    actual: rsp_addr,
                });
            }
            Ok(())
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn masked_write_register(
        &mut self,
        addr: Address,
        and_mask: Word,
        or_mask: Word,
    ) -> Result<()> {
        let request = Request::MaskWriteRegister(addr, and_mask, or_mask);
        let rsp = self.client.call(request.clone()).await?;
        if let Response::MaskWriteRegister(rsp_addr, rsp_and, rsp_or) = rsp {
            if rsp_addr != addr || rsp_and != and_mask || rsp_or != or_mask {
                return Err(Error::ProtocolMismatch {
                    expected: addr,
                    actual: rsp_addr,
                });
            }
            Ok(())
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }

    async fn write_file_record(&mut self, writes: &[FileWrite]) -> Result<()> {
        let request = Request::WriteFileRecord(writes.to_vec());
        let rsp = self.client.call(request.clone()).await?;
        if let Response::WriteFileRecord(echoed) = rsp {
            if echoed != writes {
                return Err(invalid_response_length(writes.len(), echoed.len()));
            }
            Ok(())
        } else {
            Err(unexpected_response(&request, &rsp))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug)]
    struct ClientMock {
        unit: Option<Unit>,
        last_request: Option<Request>,
        next_response: Option<Result<Response>>,
    }

    #[async_trait::async_trait]
    impl Client for ClientMock {
        async fn call(&mut self, request: Request) -> Result<Response> {
            self.last_request = Some(request);
            self.next_response.take().expect("response configured")
        }

        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl UnitContext for ClientMock {
        fn set_unit(&mut self, unit: Unit) {
            self.unit = Some(unit);
        }
    }

    fn context_with_response(response: Response) -> Context {
        let mut client = ClientMock::default();
        client.next_response = Some(Ok(response));
        Context {
            client: Box::new(client),
        }
    }

    #[tokio::test]
    async fn read_some_coils() {
        // The protocol always returns entire bytes, i.e. a multiple of
        // 8 coils.
        let response_coils = [true, false, false, true, false, true, false, true];
        for num_coils in 1..8 {
            let mut context = context_with_response(Response::ReadCoils(response_coils.to_vec()));
            context.set_unit(Unit(1));
            let coils = context.read_coils(1, num_coils).await.unwrap();
            assert_eq!(&response_coils[0..num_coils as usize], &coils[..]);
        }
    }

    #[tokio::test]
    async fn read_holding_registers_validates_length() {
        let mut context = context_with_response(Response::ReadHoldingRegisters(vec![1, 2]));
        assert!(matches!(
            context.read_holding_registers(0, 3).await,
            Err(Error::ProtocolMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn write_single_register_validates_echo() {
        let mut context = context_with_response(Response::WriteSingleRegister(0x07, 0xABCD));
        assert!(context.write_single_register(0x07, 0xABCD).await.is_ok());

        let mut context = context_with_response(Response::WriteSingleRegister(0x08, 0xABCD));
        assert!(context.write_single_register(0x07, 0xABCD).await.is_err());
    }

    #[tokio::test]
    async fn mismatched_response_variant_is_rejected() {
        let mut context = context_with_response(Response::ReadCoils(vec![true]));
        assert!(matches!(
            context.read_holding_registers(0, 1).await,
            Err(Error::ProtocolMismatch { .. })
        ));
    }
}
