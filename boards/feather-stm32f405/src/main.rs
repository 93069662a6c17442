#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use hal_abstractions::MicrosClock;
use node_core::motion::MotionLatch;
use node_core::Abort;
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod node;
mod store;

stm32_tim2_monotonic!(Mono, 1_000_000);

const LINE_LEN: usize = 64;
const RESPONSE_LEN: usize = 512;
const CHANNEL_DEPTH: usize = 4;

/// VL53L0X, only answers while XSHUT is high
const TOF_ADDRESS: u8 = 0x29;
const XSHUT_SETTLE_MS: u32 = 10;

/// Background sampling period for modules that integrate between cycles
const SAMPLE_PERIOD_MS: u64 = 1000;

type Line = heapless::String<LINE_LEN>;
type Response = heapless::String<RESPONSE_LEN>;

/// Written by the motion task, drained by the sensor task
static MOTION: MotionLatch = MotionLatch::new();
static MOTION_WAKE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Raised by the console to cut a running read cycle short
static ABORT: Abort = Abort::new();

fn now_ms() -> u64 {
    Mono::now().duration_since_epoch().to_millis()
}

/// Echo timing for the ultrasonic sensor, off the 1 MHz monotonic
pub struct MonoMicros;

impl MicrosClock for MonoMicros {
    fn now_us(&mut self) -> u32 {
        // Wraps every ~71 minutes; only differences are used
        Mono::now().duration_since_epoch().to_micros() as u32
    }
}

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2])]
mod app {
    use super::*;
    use defmt::{info, warn};
    use embassy_futures::join::join;
    use embassy_futures::select::{select4, Either4};
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::flash::Flash;
    use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
    use embassy_stm32::i2c::{self, I2c};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode};
    use embassy_stm32::time::Hertz;
    use embassy_stm32::usart::{self, Uart};
    use hal_abstractions::PowerEnable;
    use node_core::command::{Command, Effect, LineBuffer};
    use node_core::drivers::Ultrasonic;
    use rtic_sync::channel::{Receiver, Sender};
    use rtic_sync::make_channel;

    use crate::node::Node;
    use crate::store::FlashStore;

    type I2cPeripheral = embassy_stm32::Peri<'static, peripherals::I2C1>;
    type PinPB6 = embassy_stm32::Peri<'static, peripherals::PB6>;
    type PinPB7 = embassy_stm32::Peri<'static, peripherals::PB7>;
    type PinPC6 = embassy_stm32::Peri<'static, peripherals::PC6>;
    type PinPA4 = embassy_stm32::Peri<'static, peripherals::PA4>;
    type PinPA5 = embassy_stm32::Peri<'static, peripherals::PA5>;
    type PinPA6 = embassy_stm32::Peri<'static, peripherals::PA6>;
    type PinPC7 = embassy_stm32::Peri<'static, peripherals::PC7>;
    type FlashPeripheral = embassy_stm32::Peri<'static, peripherals::FLASH>;
    type ExtiChannel = embassy_stm32::Peri<'static, peripherals::EXTI7>;
    type UartPeripheral = embassy_stm32::Peri<'static, peripherals::USART3>;
    type PinPB10 = embassy_stm32::Peri<'static, peripherals::PB10>;
    type PinPB11 = embassy_stm32::Peri<'static, peripherals::PB11>;
    type DmaTx = embassy_stm32::Peri<'static, peripherals::DMA1_CH3>;
    type DmaRx = embassy_stm32::Peri<'static, peripherals::DMA1_CH1>;

    struct SensorPeripherals {
        i2c: I2cPeripheral,
        scl: PinPB6,
        sda: PinPB7,
        xshut: PinPC6,
        flash: FlashPeripheral,
        /// RAK12007 on the A0..A2 header pins
        sonar_trigger: PinPA4,
        sonar_echo: PinPA5,
        sonar_power_down: PinPA6,
    }

    struct ConsolePeripherals {
        usart: UartPeripheral,
        tx: PinPB10,
        rx: PinPB11,
        dma_tx: DmaTx,
        dma_rx: DmaRx,
    }

    embassy_stm32::bind_interrupts!(struct UartIrqs {
        USART3 => usart::InterruptHandler<peripherals::USART3>;
    });

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("WisBlock node starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        Mono::start(84_000_000);
        info!("TIM2 monotonic timer initialized at 1 MHz");

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let (line_tx, line_rx) = make_channel!(Line, CHANNEL_DEPTH);
        let (response_tx, response_rx) = make_channel!(Response, CHANNEL_DEPTH);

        let sensor_periph = SensorPeripherals {
            i2c: p.I2C1,
            scl: p.PB6,
            sda: p.PB7,
            xshut: p.PC6,
            flash: p.FLASH,
            sonar_trigger: p.PA4,
            sonar_echo: p.PA5,
            sonar_power_down: p.PA6,
        };
        let console_periph = ConsolePeripherals {
            usart: p.USART3,
            tx: p.PB10,
            rx: p.PB11,
            dma_tx: p.DMA1_CH3,
            dma_rx: p.DMA1_CH1,
        };

        heartbeat::spawn().ok();
        motion::spawn(p.PC7, p.EXTI7).ok();
        console::spawn(console_periph, line_tx, response_rx).ok();
        sensor::spawn(sensor_periph, line_rx, response_tx).ok();

        (Shared {}, Local { led })
    }

    /// Heartbeat task
    #[task(priority = 1, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        info!("Heartbeat task started");
        loop {
            cx.local.led.set_high();
            Mono::delay(100.millis()).await;
            cx.local.led.set_low();
            Mono::delay(4900.millis()).await;
        }
    }

    /// LIS3DH INT1 edge: record it and wake the sensor task, nothing else
    #[task(priority = 2)]
    async fn motion(_cx: motion::Context, pin: PinPC7, exti: ExtiChannel) -> ! {
        let mut int1 = ExtiInput::new(pin, exti, Pull::Down);
        loop {
            int1.wait_for_rising_edge().await;
            MOTION.record(now_ms());
            MOTION_WAKE.signal(());
        }
    }

    /// AT console on USART3
    ///
    /// Runs above the sensor task so a rescan request can abort a read
    /// cycle that is already running.
    #[task(priority = 2)]
    async fn console(
        _cx: console::Context,
        periph: ConsolePeripherals,
        mut lines: Sender<'static, Line, CHANNEL_DEPTH>,
        mut responses: Receiver<'static, Response, CHANNEL_DEPTH>,
    ) {
        let mut config = usart::Config::default();
        config.baudrate = 115_200;
        let uart = match Uart::new(
            periph.usart,
            periph.rx,
            periph.tx,
            UartIrqs,
            periph.dma_tx,
            periph.dma_rx,
            config,
        ) {
            Ok(uart) => uart,
            Err(e) => {
                warn!("Console UART config rejected: {:?}", e);
                return;
            }
        };
        let (mut tx, mut rx) = uart.split();
        info!("Console ready on USART3");

        let receive = async {
            let mut buffer = LineBuffer::<LINE_LEN>::new();
            let mut chunk = [0u8; 32];
            loop {
                let n = match rx.read_until_idle(&mut chunk).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Console RX error: {:?}", e);
                        continue;
                    }
                };
                for byte in &chunk[..n] {
                    let Some(line) = buffer.push(*byte) else {
                        continue;
                    };
                    if Command::parse(&line) == Ok(Command::Rescan) {
                        ABORT.request();
                    }
                    if lines.send(line).await.is_err() {
                        return;
                    }
                }
            }
        };
        let transmit = async {
            while let Ok(response) = responses.recv().await {
                if let Err(e) = tx.write(response.as_bytes()).await {
                    warn!("Console TX error: {:?}", e);
                }
            }
        };
        join(receive, transmit).await;
        info!("Console closed");
    }

    /// Owns the sensor bus: discovery, periodic and motion-triggered read
    /// cycles, background samples, AT commands
    #[task(priority = 1)]
    async fn sensor(
        _cx: sensor::Context,
        periph: SensorPeripherals,
        mut lines: Receiver<'static, Line, CHANNEL_DEPTH>,
        mut responses: Sender<'static, Response, CHANNEL_DEPTH>,
    ) {
        let store = FlashStore::new(Flash::new_blocking(periph.flash));

        let mut i2c_config = i2c::Config::default();
        i2c_config.frequency = Hertz(400_000);
        let i2c = I2c::new_blocking(periph.i2c, periph.scl, periph.sda, i2c_config);

        // XSHUT low keeps the ToF sensor off the bus outside its own probe
        let xshut = Output::new(periph.xshut, Level::Low, Speed::Low);
        let power = PowerEnable::new(xshut, 0, TOF_ADDRESS, XSHUT_SETTLE_MS);

        // Powered down and trigger idle until the first measurement
        let sonar = Ultrasonic::new(
            Output::new(periph.sonar_trigger, Level::Low, Speed::Low),
            Input::new(periph.sonar_echo, Pull::Down),
            Output::new(periph.sonar_power_down, Level::High, Speed::Low),
            MonoMicros,
        );

        let mut node = Node::new(i2c, power, sonar, store);

        let mut response = Response::new();
        node.rescan(now_ms(), &mut response, &ABORT);
        if responses.send(response).await.is_err() {
            warn!("Console gone");
        }

        let mut next_read = Mono::now() + u64::from(node.settings().send_interval_ms).millis();
        let mut next_sample = Mono::now() + SAMPLE_PERIOD_MS.millis();
        loop {
            let interval_ms = node.settings().send_interval_ms;
            let periodic = async move {
                if interval_ms == 0 {
                    core::future::pending::<()>().await;
                }
                Mono::delay_until(next_read).await;
            };

            let sampling = node.wants_samples();
            let tick = async move {
                if !sampling {
                    core::future::pending::<()>().await;
                }
                Mono::delay_until(next_sample).await;
            };

            let event = select4(periodic, MOTION_WAKE.wait(), lines.recv(), tick).await;
            match event {
                Either4::First(()) => {
                    next_read += u64::from(interval_ms).millis();
                    node.read_cycle(&ABORT);
                }
                Either4::Second(()) => {
                    if let Some(event) = MOTION.take() {
                        node.on_motion(event, &ABORT);
                    }
                }
                Either4::Third(Ok(line)) => {
                    let mut response = Response::new();
                    match node.command(&line, &mut response) {
                        Some(Effect::IntervalChanged(ms)) => {
                            next_read = Mono::now() + u64::from(ms).millis();
                        }
                        Some(Effect::ReadNow) => node.read_cycle(&ABORT),
                        Some(Effect::SetClock(time)) => node.set_clock(&time),
                        Some(Effect::Rescan) => {
                            ABORT.clear();
                            node.rescan(now_ms(), &mut response, &ABORT);
                            next_sample = Mono::now() + SAMPLE_PERIOD_MS.millis();
                        }
                        None => {}
                    }
                    if responses.send(response).await.is_err() {
                        warn!("Console gone");
                    }
                }
                Either4::Third(Err(_)) => break,
                Either4::Fourth(()) => {
                    node.sample();
                    next_sample += SAMPLE_PERIOD_MS.millis();
                    // Skip ticks missed during a long read cycle
                    if next_sample < Mono::now() {
                        next_sample = Mono::now() + SAMPLE_PERIOD_MS.millis();
                    }
                }
            }
        }

        info!("Console closed, powering modules down");
        node.shutdown();
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        info!("Idle task started - entering WFI loop");
        loop {
            cortex_m::asm::wfi();
        }
    }
}
