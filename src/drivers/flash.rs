/// W25Qxx SPI NOR flash. Holds the persisted flight configuration block at
/// the bottom of the array; access is blocking and only happens at boot and
/// during the arming sequence, never from the control path.
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Instance, Spi};

const CMD_JEDEC_ID: u8 = 0x9F;
const CMD_READ_DATA: u8 = 0x03;
const CMD_PAGE_PROGRAM: u8 = 0x02;
const CMD_SECTOR_ERASE_4K: u8 = 0x20;
const CMD_WRITE_ENABLE: u8 = 0x06;
const CMD_READ_STATUS_1: u8 = 0x05;

const STATUS_BUSY: u8 = 0x01;
const PAGE_LEN: usize = 256;
/// Erase/program polls give up after this many status reads.
const BUSY_POLL_LIMIT: u32 = 400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum FlashError {
    Spi,
    Timeout,
}

impl From<embassy_stm32::spi::Error> for FlashError {
    fn from(_: embassy_stm32::spi::Error) -> Self {
        FlashError::Spi
    }
}

pub struct W25qxx<'d, T: Instance> {
    spi: Spi<'d, T, embassy_stm32::dma::NoDma, embassy_stm32::dma::NoDma>,
    cs: Output<'d, AnyPin>,
}

impl<'d, T: Instance> W25qxx<'d, T> {
    pub fn new(
        spi: Spi<'d, T, embassy_stm32::dma::NoDma, embassy_stm32::dma::NoDma>,
        cs: Output<'d, AnyPin>,
    ) -> Self {
        Self { spi, cs }
    }

    pub fn read_id(&mut self) -> Result<[u8; 3], FlashError> {
        let mut id = [0u8; 3];
        self.cs.set_low();
        let res = self
            .spi
            .blocking_write(&[CMD_JEDEC_ID])
            .and_then(|_| self.spi.blocking_read(&mut id));
        self.cs.set_high();
        res?;
        Ok(id)
    }

    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let cmd = [
            CMD_READ_DATA,
            (addr >> 16) as u8,
            (addr >> 8) as u8,
            addr as u8,
        ];
        self.cs.set_low();
        let res = self
            .spi
            .blocking_write(&cmd)
            .and_then(|_| self.spi.blocking_read(buf));
        self.cs.set_high();
        res?;
        Ok(())
    }

    pub fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError> {
        self.write_enable()?;
        let cmd = [
            CMD_SECTOR_ERASE_4K,
            (addr >> 16) as u8,
            (addr >> 8) as u8,
            addr as u8,
        ];
        self.cs.set_low();
        let res = self.spi.blocking_write(&cmd);
        self.cs.set_high();
        res?;
        self.wait_ready()
    }

    /// Program `data` starting at `addr`, split along page boundaries.
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let mut addr = addr;
        let mut data = data;
        while !data.is_empty() {
            let room = PAGE_LEN - (addr as usize % PAGE_LEN);
            let chunk = data.len().min(room);
            self.program_page(addr, &data[..chunk])?;
            addr += chunk as u32;
            data = &data[chunk..];
        }
        Ok(())
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.write_enable()?;
        let cmd = [
            CMD_PAGE_PROGRAM,
            (addr >> 16) as u8,
            (addr >> 8) as u8,
            addr as u8,
        ];
        self.cs.set_low();
        let res = self
            .spi
            .blocking_write(&cmd)
            .and_then(|_| self.spi.blocking_write(data));
        self.cs.set_high();
        res?;
        self.wait_ready()
    }

    fn write_enable(&mut self) -> Result<(), FlashError> {
        self.cs.set_low();
        let res = self.spi.blocking_write(&[CMD_WRITE_ENABLE]);
        self.cs.set_high();
        res?;
        Ok(())
    }

    fn wait_ready(&mut self) -> Result<(), FlashError> {
        for _ in 0..BUSY_POLL_LIMIT {
            let mut status = [0u8; 1];
            self.cs.set_low();
            let res = self
                .spi
                .blocking_write(&[CMD_READ_STATUS_1])
                .and_then(|_| self.spi.blocking_read(&mut status));
            self.cs.set_high();
            res?;
            if status[0] & STATUS_BUSY == 0 {
                return Ok(());
            }
        }
        Err(FlashError::Timeout)
    }
}
