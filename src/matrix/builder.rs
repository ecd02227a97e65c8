use std::sync::Arc;

use log::debug;
use log::info;

use crate::color::LedSequence;
use crate::color::LuminanceTable;
use crate::driver::PanelDriver;
use crate::error::Hub75Error;
use crate::framebuffer::PanelLayout;
use crate::framebuffer::PixelDesignatorMap;
use crate::gpio::Gpio;
use crate::gpio::GpioBits;
use crate::gpio::GpioPort;
use crate::hardware_mapping::HardwareMapping;
use crate::matrix::refresh::RefreshConfig;
use crate::matrix::RGBMatrix;
use crate::options::MatrixOptions;
use crate::options::RuntimeOptions;
use crate::pixel_mapper::multiplex::multiplex_mapper;
use crate::pixel_mapper::MultiplexMapper;
use crate::pixel_mapper::PixelMapperRegistry;
use crate::platform::drop_privileges;
use crate::platform::Peripherals;
use crate::platform::PiModel;
use crate::pulser::create_pin_pulser;
use crate::pulser::PinPulser;
use crate::thread::tune_kernel;
use crate::timing::Clock;
use crate::timing::PreciseClock;
use crate::timing::SystemClock;

const REFRESH_PRIORITY: i32 = 99;
const REFRESH_CPU: usize = 3;

/// Geometry and pixel mapping worked out from the options.
struct Prepared {
    options: MatrixOptions,
    mapping: &'static HardwareMapping,
    layout: PanelLayout,
    designators: PixelDesignatorMap,
}

/// Step-by-step construction of an [`RGBMatrix`].
pub struct MatrixBuilder {
    options: MatrixOptions,
    mappers: PixelMapperRegistry,
    luminance: Option<Arc<LuminanceTable>>,
    defer_refresh: bool,
}

impl MatrixBuilder {
    pub fn new(options: MatrixOptions) -> Self {
        Self {
            options,
            mappers: PixelMapperRegistry::default(),
            luminance: None,
            defer_refresh: false,
        }
    }

    /// Registry used to resolve `pixel_mapper_config`, for custom mappers.
    pub fn pixel_mappers(mut self, mappers: PixelMapperRegistry) -> Self {
        self.mappers = mappers;
        self
    }

    /// Use a specific luminance table instead of the process wide one.
    pub fn luminance_table(mut self, table: Arc<LuminanceTable>) -> Self {
        self.luminance = Some(table);
        self
    }

    /// Do not start the refresh thread, see
    /// [`RGBMatrix::start_refresh`].
    pub fn defer_refresh(mut self, defer: bool) -> Self {
        self.defer_refresh = defer;
        self
    }

    fn prepare(&self) -> Result<Prepared, Hub75Error> {
        let options = self.options.clone();
        options.validate_with(&self.mappers)?;
        let mapping = HardwareMapping::find(&options.hardware_mapping)?;
        let sequence = LedSequence::parse(&options.led_rgb_sequence)?;

        let mut multiplexer = multiplex_mapper(options.multiplexing)?;
        let (mut cols, mut rows) = (options.cols, options.rows);
        if let Some(multiplexer) = &mut multiplexer {
            // stretched panels are driven with a different geometry
            multiplexer.edit_cols_rows(&mut cols, &mut rows);
        }
        let layout = PanelLayout {
            rows,
            columns: cols * options.chain_length,
            parallel: options.parallel,
        };

        let mut designators = PixelDesignatorMap::for_panels(layout, mapping, sequence);
        if let Some(multiplexer) = &multiplexer {
            designators = designators.remapped(multiplexer)?;
        }
        for mapper in self
            .mappers
            .parse_config(&options.pixel_mapper_config, options.chain_length, options.parallel)?
        {
            designators = designators.remapped(mapper.as_ref())?;
        }
        debug!(
            "{} layout {:?}, visible canvas {}x{}",
            mapping.name,
            layout,
            designators.width(),
            designators.height()
        );

        Ok(Prepared {
            options,
            mapping,
            layout,
            designators,
        })
    }

    fn luminance(&self) -> Arc<LuminanceTable> {
        self.luminance.clone().unwrap_or_else(LuminanceTable::shared)
    }

    fn refresh_config(options: &MatrixOptions) -> RefreshConfig {
        RefreshConfig {
            dither_bits: options.pwm_dither_bits,
            show_refresh_rate: options.show_refresh_rate,
            limit_refresh_rate_hz: options.limit_refresh_rate_hz,
            allow_busy_waiting: !options.disable_busy_waiting,
            realtime_priority: None,
            cpu: None,
        }
    }

    /// A matrix that only renders into memory, for converting content or
    /// testing without panels.
    pub fn build_offscreen(self) -> Result<RGBMatrix, Hub75Error> {
        let prepared = self.prepare()?;
        let config = Self::refresh_config(&prepared.options);
        Ok(RGBMatrix::assemble(
            prepared.options,
            prepared.layout,
            prepared.designators,
            self.luminance(),
            None,
            Arc::new(SystemClock::new()),
            config,
        ))
    }

    /// Drive the panels through `io`. `make_pulser` gets the output-enable
    /// pins and the per bit-plane pulse lengths in nanoseconds.
    pub fn build_with_hardware<F>(
        self,
        io: Box<dyn GpioPort>,
        clock: Arc<dyn Clock>,
        make_pulser: F,
    ) -> Result<RGBMatrix, Hub75Error>
    where
        F: FnOnce(GpioBits, &[u32]) -> Result<Box<dyn PinPulser>, Hub75Error>,
    {
        self.build_driven(io, clock, make_pulser, None, None)
    }

    fn build_driven<F>(
        self,
        io: Box<dyn GpioPort>,
        clock: Arc<dyn Clock>,
        make_pulser: F,
        realtime_priority: Option<i32>,
        cpu: Option<usize>,
    ) -> Result<RGBMatrix, Hub75Error>
    where
        F: FnOnce(GpioBits, &[u32]) -> Result<Box<dyn PinPulser>, Hub75Error>,
    {
        let prepared = self.prepare()?;
        let driver = PanelDriver::new(
            io,
            prepared.mapping,
            prepared.layout.rows,
            prepared.layout.columns,
            &prepared.options,
            make_pulser,
        )?;
        let config = RefreshConfig {
            realtime_priority,
            cpu,
            ..Self::refresh_config(&prepared.options)
        };
        let mut matrix = RGBMatrix::assemble(
            prepared.options,
            prepared.layout,
            prepared.designators,
            self.luminance(),
            Some(driver),
            clock,
            config,
        );
        if !self.defer_refresh {
            matrix.start_refresh()?;
        }
        Ok(matrix)
    }

    /// Map the Raspberry Pi's peripherals and start driving the panels.
    pub fn build(mut self, runtime: &RuntimeOptions) -> Result<RGBMatrix, Hub75Error> {
        runtime.validate()?;
        if !runtime.do_gpio_init {
            return self.build_offscreen();
        }

        let model = PiModel::detect();
        let peripherals = Peripherals::map_for(model)?;
        info!("driving {} panels on a {:?}", self.options.hardware_mapping, model);
        tune_kernel(model);

        let clock: Arc<dyn Clock> = Arc::new(PreciseClock::new(peripherals.clone()));
        let io = Box::new(Gpio::new(peripherals.clone(), runtime.gpio_slowdown));
        let allow_hardware_pulsing = !self.options.disable_hardware_pulsing;
        let pulser_clock = clock.clone();
        let make_pulser = move |pins: GpioBits, timings: &[u32]| {
            create_pin_pulser(&peripherals, pulser_clock, pins, allow_hardware_pulsing, timings)
        };

        if runtime.daemon < 0 {
            self.defer_refresh = true;
        }
        let cpu = (model.cores() > 1).then_some(REFRESH_CPU);
        let matrix = self.build_driven(io, clock, make_pulser, Some(REFRESH_PRIORITY), cpu)?;

        if runtime.drop_privileges > 0 {
            drop_privileges(&runtime.drop_priv_user, &runtime.drop_priv_group)?;
        }
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::thread::JoinHandleExt;

    use super::*;
    use crate::sim::SimulatedGpio;
    use crate::sim::SimulatedPulser;

    fn cpus_of(thread: libc::pthread_t) -> Vec<usize> {
        // SAFETY: cpu_set_t is plain data; the thread is alive until the matrix drops
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            let size = std::mem::size_of::<libc::cpu_set_t>();
            assert_eq!(libc::pthread_getaffinity_np(thread, size, &mut set), 0);
            (0..libc::CPU_SETSIZE as usize)
                .filter(|&cpu| libc::CPU_ISSET(cpu, &set))
                .collect()
        }
    }

    fn pinned_matrix(cpu: usize, defer: bool) -> RGBMatrix {
        let options = MatrixOptions {
            rows: 16,
            cols: 32,
            ..MatrixOptions::default()
        };
        RGBMatrix::builder(options)
            .defer_refresh(defer)
            .build_driven(
                Box::new(SimulatedGpio::new()),
                Arc::new(SystemClock::new()),
                |_, _| Ok(Box::new(SimulatedPulser::new()) as Box<dyn PinPulser>),
                None,
                Some(cpu),
            )
            .unwrap()
    }

    fn own_cpu() -> usize {
        // SAFETY: pthread_self is always valid
        cpus_of(unsafe { libc::pthread_self() })[0]
    }

    #[test]
    fn refresh_thread_is_pinned_before_build_returns() {
        let cpu = own_cpu();
        let matrix = pinned_matrix(cpu, false);
        let thread = matrix.refresh.as_ref().unwrap().as_pthread_t();
        assert_eq!(cpus_of(thread), vec![cpu]);
    }

    #[test]
    fn deferred_refresh_thread_is_pinned_on_start() {
        let cpu = own_cpu();
        let mut matrix = pinned_matrix(cpu, true);
        assert!(matrix.refresh.is_none());
        matrix.start_refresh().unwrap();
        let thread = matrix.refresh.as_ref().unwrap().as_pthread_t();
        assert_eq!(cpus_of(thread), vec![cpu]);
    }
}
