//! FUSB302B register map, bit definitions and FIFO token codes.
#![allow(missing_docs)]

pub const DEVICE_ID: u8 = 0x01;
pub const SWITCHES0: u8 = 0x02;
pub const SWITCHES1: u8 = 0x03;
pub const MEASURE: u8 = 0x04;
pub const SLICE: u8 = 0x05;
pub const CONTROL0: u8 = 0x06;
pub const CONTROL1: u8 = 0x07;
pub const CONTROL2: u8 = 0x08;
pub const CONTROL3: u8 = 0x09;
pub const MASK1: u8 = 0x0A;
pub const POWER: u8 = 0x0B;
pub const RESET: u8 = 0x0C;
pub const OCPREG: u8 = 0x0D;
pub const MASKA: u8 = 0x0E;
pub const MASKB: u8 = 0x0F;
pub const CONTROL4: u8 = 0x10;
pub const STATUS0A: u8 = 0x3C;
pub const STATUS1A: u8 = 0x3D;
pub const INTERRUPTA: u8 = 0x3E;
pub const INTERRUPTB: u8 = 0x3F;
pub const STATUS0: u8 = 0x40;
pub const STATUS1: u8 = 0x41;
pub const INTERRUPT: u8 = 0x42;
pub const FIFOS: u8 = 0x43;

pub const SWITCHES0_PDWN1: u8 = 0x01;
pub const SWITCHES0_PDWN2: u8 = 0x02;
pub const SWITCHES0_MEAS_CC1: u8 = 0x04;
pub const SWITCHES0_MEAS_CC2: u8 = 0x08;

pub const SWITCHES1_TXCC1: u8 = 0x01;
pub const SWITCHES1_TXCC2: u8 = 0x02;
pub const SWITCHES1_AUTO_CRC: u8 = 0x04;
pub const SWITCHES1_SPECREV_2_0: u8 = 0x20;

pub const MEASURE_MEAS_VBUS: u8 = 0x40;

pub const CONTROL0_HOST_CUR_USB: u8 = 0x04;
pub const CONTROL0_HOST_CUR_3A0: u8 = 0x0C;
pub const CONTROL0_TX_FLUSH: u8 = 0x40;

pub const CONTROL1_RX_FLUSH: u8 = 0x04;

pub const CONTROL3_AUTO_RETRY: u8 = 0x01;
pub const CONTROL3_N_RETRIES_3: u8 = 0x06;
pub const CONTROL3_SEND_HARD_RESET: u8 = 0x40;

pub const RESET_SW_RES: u8 = 0x01;
pub const RESET_PD_RESET: u8 = 0x02;

pub const POWER_ALL: u8 = 0x0F;

pub const STATUS0_BC_LVL: u8 = 0x03;
pub const STATUS0_COMP: u8 = 0x20;
pub const STATUS0_VBUSOK: u8 = 0x80;

pub const STATUS1_OVRTEMP: u8 = 0x02;
pub const STATUS1_RX_EMPTY: u8 = 0x20;

pub const INTERRUPTA_I_TXSENT: u8 = 0x04;
pub const INTERRUPTA_I_RETRYFAIL: u8 = 0x10;
pub const INTERRUPTA_I_OCP_TEMP: u8 = 0x80;

pub const INTERRUPTB_I_GCRCSENT: u8 = 0x01;

pub const FIFO_TX_SOP1: u8 = 0x12;
pub const FIFO_TX_SOP2: u8 = 0x13;
pub const FIFO_TX_EOP: u8 = 0x14;
pub const FIFO_TX_PACKSYM: u8 = 0x80;
pub const FIFO_TX_JAM_CRC: u8 = 0xFF;
pub const FIFO_TX_TXOFF: u8 = 0xFE;
pub const FIFO_TX_TXON: u8 = 0xA1;

pub const FIFO_RX_TOKEN_BITS: u8 = 0xE0;
pub const FIFO_RX_SOP: u8 = 0xE0;
