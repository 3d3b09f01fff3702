mod color;
mod config;
mod packet;
mod usb;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::LevelFilter;
use rich_rust::markup;
use rich_rust::prelude::*;
use rich_rust::r#box::ROUNDED;
use simple_logger::SimpleLogger;
use std::path::PathBuf;

use crate::color::{parse_color, ColorCommand};
use crate::config::{format_usb_id, parse_usb_id, ConfigStore, DeviceConfig};
use crate::packet::Packet;
use crate::usb::{PacketSink, RgbDevice, UsbDeviceSummary};

/// Bytes per line when showing a packet.
const HEX_LINE_BYTES: usize = 16;

#[derive(Parser)]
#[command(name = "rgbset")]
#[command(version)]
#[command(about = "Set a solid color on a USB RGB lighting controller")]
#[command(
    long_about = "Set a solid color on a USB RGB lighting controller by replaying a raw packet.\n\nThe first successful `set` saves the device ids, endpoint and packet layout, so later runs only need the color."
)]
struct Cli {
    /// Config file to use instead of the per-user default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached USB devices with their vendor and product ids
    Scan,

    /// Set a solid color and remember the device on success
    Set {
        /// Hex color code, e.g. FF0000 or "#00ff7f"
        #[arg(value_parser = parse_color)]
        color: ColorCommand,

        /// Device vendor id (e.g. 0x0416); overrides the saved config
        #[arg(long, value_parser = parse_usb_id)]
        vid: Option<u16>,

        /// Device product id (e.g. 0x7399); overrides the saved config
        #[arg(long, value_parser = parse_usb_id)]
        pid: Option<u16>,

        /// Print the packet instead of sending it (nothing is saved)
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the config file location and the saved device settings
    Config,

    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

struct RgbSet {
    console: Console,
    store: ConfigStore,
}

impl RgbSet {
    fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let path = match config_path {
            Some(path) => path,
            None => ConfigStore::default_path()?,
        };
        Ok(Self {
            console: Console::new(),
            store: ConfigStore::new(path),
        })
    }

    fn print_header(&self, color: &str, title: &str) {
        self.console.print("");
        self.console.print(&format!(
            "[bold {color}]┌─────────────────────────────────────────────────────────┐[/]"
        ));
        self.console.print(&format!(
            "[bold {color}]│[/]  [bold white]{title:<54}[/] [bold {color}]│[/]"
        ));
        self.console.print(&format!(
            "[bold {color}]└─────────────────────────────────────────────────────────┘[/]"
        ));
        self.console.print("");
    }

    fn print_packet(&self, packet: &Packet) {
        let color_range = packet.color_range();
        self.console.print(&format!(
            "  [dim]Packet:[/] [bold]{}[/] bytes, color at offset [bold]{}[/]",
            packet.len(),
            color_range.start
        ));
        for (i, chunk) in packet.as_bytes().chunks(HEX_LINE_BYTES).enumerate() {
            self.console.print(&format!(
                "    [#95a5a6]{:04x}[/]  {}",
                i * HEX_LINE_BYTES,
                hex::encode(chunk)
            ));
        }
        self.console.print("");
    }

    fn scan(&self) -> Result<()> {
        let devices = usb::list_devices()?;
        self.show_devices(&devices)
    }

    fn show_devices(&self, devices: &[UsbDeviceSummary]) -> Result<()> {
        if devices.is_empty() {
            bail!("No USB devices found or permission denied (try running with sudo)");
        }

        self.print_header("#3498db", "USB DEVICES");

        let mut table = Table::new()
            .box_style(&ROUNDED)
            .header_style(Style::parse("bold #f1c40f").unwrap_or_default())
            .border_style(Style::parse("#3498db").unwrap_or_default())
            .with_column(Column::new("VID"))
            .with_column(Column::new("PID"))
            .with_column(Column::new("Bus/Addr"))
            .with_column(Column::new("Product"));

        for device in devices {
            table.add_row_cells([
                markup::render_or_plain(&format_usb_id(device.vid)),
                markup::render_or_plain(&format_usb_id(device.pid)),
                markup::render_or_plain(&format!("{:03}/{:03}", device.bus, device.address)),
                markup::render_or_plain(&device.product),
            ]);
        }

        self.console.print_renderable(&table);
        self.console.print(&format!(
            "  [#95a5a6]{} device(s). Pass the VID and PID of your controller to[/] [bold #f1c40f]rgbset set[/]",
            devices.len()
        ));
        self.console.print("");
        Ok(())
    }

    fn set(
        &self,
        color: ColorCommand,
        vid: Option<u16>,
        pid: Option<u16>,
        dry_run: bool,
    ) -> Result<()> {
        let stored = self.store.load()?;
        let config = DeviceConfig::resolve(stored, vid, pid)?;
        let packet = Packet::for_config(&config, color);

        if dry_run {
            self.print_header("#9b59b6", "DRY RUN");
            self.console.print(&format!(
                "  [dim]Target:[/] VID:{} PID:{} endpoint 0x{:02x}",
                format_usb_id(config.vid),
                format_usb_id(config.pid),
                config.endpoint
            ));
            self.print_packet(&packet);
            self.console
                .print("  [#f39c12]→[/] Dry run: nothing sent, config not saved");
            self.console.print("");
            return Ok(());
        }

        self.console.print(&format!(
            "  [#3498db]→[/] Connecting to VID:{} PID:{}...",
            format_usb_id(config.vid),
            format_usb_id(config.pid)
        ));
        let mut device = RgbDevice::open(&config)?;
        send_color(&mut device, &config, &packet, &self.store)?;
        drop(device);

        self.console
            .print(&format!("  [bold #2ecc71]✓[/] Color set to [bold]{}[/]", color));
        self.console.print(&format!(
            "  [dim]Configuration saved to[/] [#95a5a6]{}[/]",
            self.store.path().display()
        ));
        Ok(())
    }

    fn show_config(&self) -> Result<()> {
        self.console.print(&format!(
            "  [dim]Config file:[/] [#95a5a6]{}[/]",
            self.store.path().display()
        ));

        let Some(config) = self.store.load()? else {
            self.console.print(
                "  [#f39c12]No saved configuration yet.[/] Run [bold #f1c40f]rgbset set <RRGGBB> --vid <VID> --pid <PID>[/] once.",
            );
            return Ok(());
        };

        let mut table = Table::new()
            .box_style(&ROUNDED)
            .header_style(Style::parse("bold #f1c40f").unwrap_or_default())
            .border_style(Style::parse("#3498db").unwrap_or_default())
            .with_column(Column::new("Field"))
            .with_column(Column::new("Value"));

        let rows = [
            ("vid", format_usb_id(config.vid)),
            ("pid", format_usb_id(config.pid)),
            ("endpoint", format!("0x{:02x}", config.endpoint)),
            ("packet_header", format!("{} bytes", config.packet_header.len())),
            ("packet_footer", format!("{} bytes", config.packet_footer.len())),
            ("packet length", format!("{} bytes", packet::packet_len(&config))),
        ];
        for (field, value) in rows {
            table.add_row_cells([
                markup::render_or_plain(field),
                markup::render_or_plain(&value),
            ]);
        }
        self.console.print_renderable(&table);
        Ok(())
    }
}

/// Write the packet once and persist the config only after the device accepted all of it.
fn send_color<S: PacketSink>(
    sink: &mut S,
    config: &DeviceConfig,
    packet: &Packet,
    store: &ConfigStore,
) -> Result<()> {
    log::debug!("packet {}", packet.to_hex());
    let written = sink.write_packet(packet)?;
    if written != packet.len() {
        bail!(
            "Short write: device accepted {} of {} bytes",
            written,
            packet.len()
        );
    }
    store.save(config).context("Color was sent but the config could not be saved")
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
        .context("Failed to initialize logging")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "rgbset", &mut std::io::stdout());
        return Ok(());
    }

    let app = RgbSet::new(cli.config)?;

    match cli.command {
        Commands::Scan => {
            app.scan()?;
        }
        Commands::Set {
            color,
            vid,
            pid,
            dry_run,
        } => {
            app.set(color, vid, pid, dry_run)?;
        }
        Commands::Config => {
            app.show_config()?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Records what was written and reports a configurable transfer outcome.
    struct FakeSink {
        written: Vec<Vec<u8>>,
        accept: Option<usize>,
    }

    impl FakeSink {
        fn accepting_all() -> Self {
            Self {
                written: Vec::new(),
                accept: None,
            }
        }
    }

    impl PacketSink for FakeSink {
        fn write_packet(&mut self, packet: &Packet) -> Result<usize> {
            self.written.push(packet.as_bytes().to_vec());
            Ok(self.accept.unwrap_or(packet.len()))
        }
    }

    struct FailingSink;

    impl PacketSink for FailingSink {
        fn write_packet(&mut self, _packet: &Packet) -> Result<usize> {
            bail!("Failed to open device (permission denied)")
        }
    }

    fn fixture() -> (TempDir, ConfigStore, DeviceConfig, Packet) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        let config = DeviceConfig::with_defaults(0x0416, 0x7399);
        let packet = Packet::for_config(&config, ColorCommand::from_string("FF8000").unwrap());
        (dir, store, config, packet)
    }

    #[test]
    fn send_color_writes_once_and_saves() {
        let (_dir, store, config, packet) = fixture();
        let mut sink = FakeSink::accepting_all();

        send_color(&mut sink, &config, &packet, &store).unwrap();

        assert_eq!(sink.written.len(), 1);
        assert_eq!(&sink.written[0][9..12], &[0xFF, 0x80, 0x00]);
        assert_eq!(store.load().unwrap(), Some(config));
    }

    #[test]
    fn send_color_short_write_is_fatal_and_not_saved() {
        let (_dir, store, config, packet) = fixture();
        let mut sink = FakeSink {
            written: Vec::new(),
            accept: Some(32),
        };

        let err = send_color(&mut sink, &config, &packet, &store).unwrap_err();
        assert!(err.to_string().contains("Short write"));
        assert_eq!(sink.written.len(), 1);
        assert!(!store.path().exists());
    }

    #[test]
    fn send_color_failure_leaves_no_config() {
        let (_dir, store, config, packet) = fixture();

        let err = send_color(&mut FailingSink, &config, &packet, &store).unwrap_err();
        assert!(err.to_string().contains("permission denied"));
        assert!(!store.path().exists());
    }

    #[test]
    fn send_color_overwrites_previous_config() {
        let (_dir, store, config, packet) = fixture();
        store
            .save(&DeviceConfig::with_defaults(0x1111, 0x2222))
            .unwrap();

        send_color(&mut FakeSink::accepting_all(), &config, &packet, &store).unwrap();
        assert_eq!(store.load().unwrap().map(|c| c.vid), Some(0x0416));
    }

    fn app(dir: &TempDir) -> RgbSet {
        RgbSet::new(Some(dir.path().join("config.json"))).unwrap()
    }

    #[test]
    fn show_devices_empty_list_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = app(&dir).show_devices(&[]).unwrap_err();
        assert!(err.to_string().contains("No USB devices found"));
    }

    #[test]
    fn show_devices_lists_rows() {
        let dir = TempDir::new().unwrap();
        let devices = [UsbDeviceSummary {
            vid: 0x0416,
            pid: 0x7399,
            bus: 1,
            address: 4,
            product: "Controller".to_string(),
        }];
        app(&dir).show_devices(&devices).unwrap();
    }

    #[test]
    fn cli_parses_set_with_ids() {
        let cli = Cli::try_parse_from([
            "rgbset", "set", "#00ff7f", "--vid", "0x0416", "--pid", "7399",
        ])
        .unwrap();
        match cli.command {
            Commands::Set {
                color,
                vid,
                pid,
                dry_run,
            } => {
                assert_eq!(color.to_bytes(), [0x00, 0xFF, 0x7F]);
                assert_eq!(vid, Some(0x0416));
                assert_eq!(pid, Some(0x7399));
                assert!(!dry_run);
            }
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn cli_rejects_bad_color_at_parse_time() {
        assert!(Cli::try_parse_from(["rgbset", "set", "FF00"]).is_err());
        assert!(Cli::try_parse_from(["rgbset", "set", "GG0000"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
