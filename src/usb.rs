//! libusb access: device enumeration and the one-shot packet write.

use crate::config::{format_usb_id, DeviceConfig};
use crate::packet::Packet;
use anyhow::{anyhow, bail, Context as _, Result};
use rusb::{ConfigDescriptor, Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use std::time::Duration;

const STRING_TIMEOUT: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);
/// `wMaxPacketSize` bits 0..=10; bits 11-12 carry the high-bandwidth multiplier.
const MAX_PACKET_SIZE_MASK: u16 = 0x07FF;

/// One row of `rgbset scan`.
#[derive(Debug, Clone)]
pub struct UsbDeviceSummary {
    pub vid: u16,
    pub pid: u16,
    pub bus: u8,
    pub address: u8,
    pub product: String,
}

/// List every attached USB device. Devices whose descriptor cannot be read are skipped.
pub fn list_devices() -> Result<Vec<UsbDeviceSummary>> {
    let devices = usb_context()?
        .devices()
        .context("Failed to enumerate USB devices via libusb (try running with sudo)")?;

    let mut summaries = Vec::new();
    for device in devices.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                log::debug!(
                    "skipping bus {:03} device {:03}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                continue;
            }
        };
        summaries.push(UsbDeviceSummary {
            vid: desc.vendor_id(),
            pid: desc.product_id(),
            bus: device.bus_number(),
            address: device.address(),
            product: read_product_name(&device, &desc).unwrap_or_else(|| "Unknown".to_string()),
        });
    }
    Ok(summaries)
}

/// A fresh libusb context. Initialization failures (no usbfs, no permission on the bus)
/// come back as errors instead of the global context's panic.
fn usb_context() -> Result<Context> {
    Context::new().map_err(init_error)
}

fn init_error(e: rusb::Error) -> anyhow::Error {
    anyhow!(e).context("Failed to initialize libusb (try running with sudo)")
}

fn read_product_name(
    device: &Device<Context>,
    desc: &rusb::DeviceDescriptor,
) -> Option<String> {
    desc.product_string_index()?;
    let handle = device.open().ok()?;
    let langs = handle.read_languages(STRING_TIMEOUT).ok()?;
    let lang = langs.first()?;
    handle
        .read_product_string(*lang, desc, STRING_TIMEOUT)
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// The configured endpoint as described by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub interface: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    /// The endpoint must accept host-to-device bulk or interrupt transfers of exactly one packet.
    pub fn check_packet(&self, packet_len: usize) -> Result<()> {
        if self.direction != Direction::Out {
            bail!(
                "Endpoint 0x{:02x} is an IN endpoint; colors must be written to an OUT endpoint",
                self.address
            );
        }
        match self.transfer_type {
            TransferType::Bulk | TransferType::Interrupt => {}
            other => bail!(
                "Endpoint 0x{:02x} uses {:?} transfers; only bulk and interrupt are supported",
                self.address,
                other
            ),
        }
        if packet_len != usize::from(self.max_packet_size) {
            bail!(
                "Packet is {} bytes but endpoint 0x{:02x} expects {}-byte transfers \
                 (check packet_header/packet_footer in the config)",
                packet_len,
                self.address,
                self.max_packet_size
            );
        }
        Ok(())
    }
}

/// Bytes per transaction from a raw `wMaxPacketSize`.
fn transfer_size(raw_max_packet_size: u16) -> u16 {
    raw_max_packet_size & MAX_PACKET_SIZE_MASK
}

fn find_endpoint(config: &ConfigDescriptor, address: u8) -> Option<EndpointInfo> {
    for interface in config.interfaces() {
        for desc in interface.descriptors() {
            for ep in desc.endpoint_descriptors() {
                if ep.address() == address {
                    return Some(EndpointInfo {
                        address,
                        interface: desc.interface_number(),
                        direction: ep.direction(),
                        transfer_type: ep.transfer_type(),
                        max_packet_size: transfer_size(ep.max_packet_size()),
                    });
                }
            }
        }
    }
    None
}

fn usb_error(e: rusb::Error, action: &str) -> anyhow::Error {
    let hint = match e {
        rusb::Error::Access => " (permission denied: run with sudo or add a udev rule)",
        rusb::Error::Busy => " (interface is held by another driver or program)",
        rusb::Error::NoDevice => " (device was disconnected)",
        rusb::Error::Timeout => " (device did not accept the transfer in time)",
        _ => "",
    };
    anyhow!(e).context(format!("{action}{hint}"))
}

/// Anything a color packet can be written to.
pub trait PacketSink {
    /// Write the whole packet once and return the number of bytes the transfer accepted.
    fn write_packet(&mut self, packet: &Packet) -> Result<usize>;
}

/// An opened controller with its endpoint interface claimed. Dropping it releases the
/// interface and hands it back to the kernel driver if one was detached.
pub struct RgbDevice {
    handle: DeviceHandle<Context>,
    endpoint: EndpointInfo,
    detached_kernel_driver: bool,
    claimed: bool,
}

impl RgbDevice {
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        let vid = format_usb_id(config.vid);
        let pid = format_usb_id(config.pid);

        let devices = usb_context()?
            .devices()
            .context("Failed to enumerate USB devices via libusb (try running with sudo)")?;
        let device = devices
            .iter()
            .find(|device| {
                device
                    .device_descriptor()
                    .map(|d| d.vendor_id() == config.vid && d.product_id() == config.pid)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                anyhow!(
                    "Device VID:{} PID:{} not found. Please check the connection \
                     (run 'rgbset scan' to list devices)",
                    vid,
                    pid
                )
            })?;
        log::info!(
            "found {}:{} on bus {:03} device {:03}",
            vid,
            pid,
            device.bus_number(),
            device.address()
        );

        let handle = device
            .open()
            .map_err(|e| usb_error(e, &format!("Failed to open device {}:{}", vid, pid)))?;

        let config_desc = match device.active_config_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                log::debug!("no active configuration ({}), selecting the first one", e);
                let desc = device
                    .config_descriptor(0)
                    .context("Failed to read USB configuration descriptor")?;
                handle
                    .set_active_configuration(desc.number())
                    .map_err(|e| usb_error(e, "Failed to set USB configuration"))?;
                desc
            }
        };

        let endpoint = find_endpoint(&config_desc, config.endpoint).ok_or_else(|| {
            anyhow!(
                "Endpoint 0x{:02x} does not exist on device {}:{}",
                config.endpoint,
                vid,
                pid
            )
        })?;
        log::debug!("endpoint {:?}", endpoint);

        let mut rgb = Self {
            handle,
            endpoint,
            detached_kernel_driver: false,
            claimed: false,
        };

        let interface_num = endpoint.interface;
        if rgb.handle.kernel_driver_active(interface_num).unwrap_or(false) {
            log::info!("detaching kernel driver from interface {}", interface_num);
            rgb.handle
                .detach_kernel_driver(interface_num)
                .map_err(|e| usb_error(e, "Failed to detach kernel driver"))?;
            rgb.detached_kernel_driver = true;
        }

        rgb.handle
            .claim_interface(interface_num)
            .map_err(|e| usb_error(e, &format!("Failed to claim interface {}", interface_num)))?;
        rgb.claimed = true;
        log::info!("claimed interface {}", interface_num);

        Ok(rgb)
    }
}

impl PacketSink for RgbDevice {
    fn write_packet(&mut self, packet: &Packet) -> Result<usize> {
        self.endpoint.check_packet(packet.len())?;
        let address = self.endpoint.address;
        let written = match self.endpoint.transfer_type {
            TransferType::Bulk => {
                self.handle
                    .write_bulk(address, packet.as_bytes(), WRITE_TIMEOUT)
            }
            TransferType::Interrupt => {
                self.handle
                    .write_interrupt(address, packet.as_bytes(), WRITE_TIMEOUT)
            }
            other => bail!("Unsupported transfer type {:?}", other),
        }
        .map_err(|e| usb_error(e, &format!("Failed to write to endpoint 0x{:02x}", address)))?;
        log::debug!("wrote {} of {} bytes", written, packet.len());
        Ok(written)
    }
}

impl Drop for RgbDevice {
    fn drop(&mut self) {
        let interface_num = self.endpoint.interface;
        if self.claimed {
            let _ = self.handle.release_interface(interface_num);
        }

        if self.detached_kernel_driver {
            // Best-effort: give the interface back to the kernel driver we took it from.
            let _ = self.handle.attach_kernel_driver(interface_num);
        }
    }
}
