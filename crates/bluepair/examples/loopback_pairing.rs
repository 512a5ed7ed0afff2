/// Example pairing two in-process Security Managers over a loopback link
use bluepair::smp::*;
use bluepair::{Address, BdAddr};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::{Duration, Instant};

const HANDLE: ConnHandle = 0x0040;

enum Frame {
    Pdu(Vec<u8>),
    Encrypt { key: [u8; 16], ediv: u16, rand: [u8; 8] },
}

/// Collects what one side puts on the air
#[derive(Default)]
struct Loopback {
    frames: VecDeque<Frame>,
}

impl SmpTransport for Loopback {
    fn send(&mut self, handle: ConnHandle, pdu: &[u8]) -> SmpResult<()> {
        println!("  [{:#06x}] tx {}", handle, hex::encode(pdu));
        self.frames.push_back(Frame::Pdu(pdu.to_vec()));
        Ok(())
    }

    fn start_encryption(
        &mut self,
        handle: ConnHandle,
        key: &[u8; 16],
        ediv: u16,
        rand: &[u8; 8],
    ) -> SmpResult<()> {
        println!("  [{:#06x}] start encryption", handle);
        self.frames.push_back(Frame::Encrypt {
            key: *key,
            ediv,
            rand: *rand,
        });
        Ok(())
    }
}

/// Console user interface of one device
struct Console {
    name: &'static str,
    done: bool,
}

impl Console {
    fn new(name: &'static str) -> Self {
        Self { name, done: false }
    }

    fn prompt(&self, question: &str) -> io::Result<String> {
        print!("{}: {} ", self.name, question);
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_lowercase())
    }
}

impl PairingDelegate for Console {
    fn display_passkey(&mut self, _handle: ConnHandle, passkey: u32) {
        println!("{}: passkey {:06}", self.name, passkey);
    }

    fn request_passkey(&mut self, _handle: ConnHandle) -> UserResponse<u32> {
        match self.prompt("enter the passkey shown on the other device:") {
            Ok(input) => match input.parse() {
                Ok(passkey) => UserResponse::Ready(passkey),
                Err(_) => UserResponse::Rejected,
            },
            Err(_) => UserResponse::Rejected,
        }
    }

    fn confirm_numeric_comparison(&mut self, _handle: ConnHandle, value: u32) -> UserResponse<bool> {
        match self.prompt(&format!("does {:06} match? (y/n)", value)) {
            Ok(input) => UserResponse::Ready(input == "y" || input == "yes"),
            Err(_) => UserResponse::Rejected,
        }
    }

    fn notify(&mut self, event: SmpEvent) {
        println!("{}: {:?}", self.name, event);
    }

    fn pairing_complete(&mut self, _handle: ConnHandle, outcome: PairingOutcome) {
        match &outcome {
            PairingOutcome::Success { auth_state, keys } => {
                println!(
                    "{}: paired, security level {:?}",
                    self.name,
                    auth_state.security_level()
                );
                if let Some(ltk) = &keys.ltk {
                    println!("{}: LTK {}", self.name, hex::encode(ltk.key));
                }
            }
            PairingOutcome::Failure(reason) => {
                println!("{}: pairing failed: {}", self.name, reason);
            }
        }
        self.done = true;
    }
}

type Device = SmpManager<Loopback, Console>;

/// Deliver queued frames until both sides are quiet
fn run(central: &mut Device, peripheral: &mut Device) -> SmpResult<()> {
    loop {
        if let Some(frame) = central.transport_mut().frames.pop_front() {
            match frame {
                Frame::Pdu(data) => peripheral.handle_pdu(HANDLE, &data)?,
                Frame::Encrypt { key, ediv, rand } => {
                    let ok = peripheral.ltk_request(HANDLE, ediv, &rand) == Some(key);
                    peripheral.encryption_changed(HANDLE, ok)?;
                    central.encryption_changed(HANDLE, ok)?;
                }
            }
            continue;
        }
        if let Some(Frame::Pdu(data)) = peripheral.transport_mut().frames.pop_front() {
            central.handle_pdu(HANDLE, &data)?;
            continue;
        }
        return Ok(());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("SMP Loopback Pairing Example");
    println!("----------------------------");

    let central_config = SmConfig {
        io_capability: IoCapability::DisplayYesNo,
        mitm: true,
        ..Default::default()
    };
    let peripheral_config = SmConfig {
        io_capability: IoCapability::KeyboardDisplay,
        mitm: true,
        ..Default::default()
    };

    let mut central = SmpManager::new(central_config, Loopback::default(), Console::new("central"))?;
    let mut peripheral = SmpManager::new(
        peripheral_config,
        Loopback::default(),
        Console::new("peripheral"),
    )?;

    let central_addr = Address::public(BdAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]));
    let peripheral_addr = Address::random(BdAddr::new([0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xC6]));
    central.connection_created(HANDLE, central_addr, peripheral_addr);
    peripheral.connection_created(HANDLE, peripheral_addr, central_addr);

    println!("Initiating pairing...");
    central.start_pairing(HANDLE)?;

    let deadline = Instant::now() + Duration::from_secs(120);
    while !(central.delegate().done && peripheral.delegate().done) {
        run(&mut central, &mut peripheral)?;
        let now = Instant::now();
        if now > deadline {
            println!("Gave up waiting for pairing to complete");
            break;
        }
        central.process_timeouts(now);
        peripheral.process_timeouts(now);
        std::thread::sleep(Duration::from_millis(10));
    }

    println!("\nBonded devices on the central:");
    for peer in central.bond_store().bonded_peers() {
        println!("  {}", peer);
    }
    Ok(())
}
