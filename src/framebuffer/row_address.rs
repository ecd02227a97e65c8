//! Ways of selecting the double-row that receives the next strobe.

use crate::gpio::GpioBits;
use crate::gpio::GpioPort;
use crate::hardware_mapping::HardwareMapping;
use crate::options::RowAddressType;

pub trait RowAddressSetter: Send {
    /// Address lines this setter drives.
    fn need_bits(&self) -> GpioBits;

    fn set_row_address(&mut self, io: &mut dyn GpioPort, row: usize);
}

/// Binary row number on A..E.
pub struct DirectRowAddressSetter {
    row_mask: GpioBits,
    row_lookup: Vec<GpioBits>,
    last_row: Option<usize>,
}

impl DirectRowAddressSetter {
    pub fn new(double_rows: usize, mapping: &HardwareMapping) -> Self {
        let lines = [mapping.a, mapping.b, mapping.c, mapping.d, mapping.e];
        let mut row_mask = mapping.a;
        for (line, threshold) in lines.iter().skip(1).zip([2, 4, 8, 16]) {
            if double_rows > threshold {
                row_mask |= line;
            }
        }
        let row_lookup = (0..double_rows)
            .map(|row| {
                lines
                    .iter()
                    .enumerate()
                    .filter(|(bit, _)| row & (1 << bit) != 0)
                    .fold(0, |bits, (_, line)| bits | line)
            })
            .collect();
        Self {
            row_mask,
            row_lookup,
            last_row: None,
        }
    }
}

impl RowAddressSetter for DirectRowAddressSetter {
    fn need_bits(&self) -> GpioBits {
        self.row_mask
    }

    fn set_row_address(&mut self, io: &mut dyn GpioPort, row: usize) {
        if self.last_row == Some(row) {
            return;
        }
        io.write_masked_bits(self.row_lookup[row], self.row_mask);
        self.last_row = Some(row);
    }
}

/// Panels with a shift register for the rows: A is the clock and B the
/// (active low) data line.
pub struct ShiftRegisterRowAddressSetter {
    double_rows: usize,
    clock: GpioBits,
    data: GpioBits,
    last_row: Option<usize>,
}

impl ShiftRegisterRowAddressSetter {
    pub fn new(double_rows: usize, mapping: &HardwareMapping) -> Self {
        Self {
            double_rows,
            clock: mapping.a,
            data: mapping.b,
            last_row: None,
        }
    }
}

impl RowAddressSetter for ShiftRegisterRowAddressSetter {
    fn need_bits(&self) -> GpioBits {
        self.clock | self.data
    }

    fn set_row_address(&mut self, io: &mut dyn GpioPort, row: usize) {
        if self.last_row == Some(row) {
            return;
        }
        for activate in 0..self.double_rows {
            io.clear_bits(self.clock);
            if activate == self.double_rows - 1 - row {
                io.clear_bits(self.data);
            } else {
                io.set_bits(self.data);
            }
            io.set_bits(self.clock);
        }
        io.clear_bits(self.clock);
        io.set_bits(self.clock);
        self.last_row = Some(row);
    }
}

/// One of A, B, C or D is raised per row, repeating every four rows.
pub struct DirectLineRowAddressSetter {
    row_lines: [GpioBits; 4],
    row_mask: GpioBits,
    last_row: Option<usize>,
}

impl DirectLineRowAddressSetter {
    pub fn new(mapping: &HardwareMapping) -> Self {
        let row_lines = [mapping.a, mapping.b, mapping.c, mapping.d];
        Self {
            row_lines,
            row_mask: row_lines.iter().fold(0, |mask, line| mask | line),
            last_row: None,
        }
    }
}

impl RowAddressSetter for DirectLineRowAddressSetter {
    fn need_bits(&self) -> GpioBits {
        self.row_mask
    }

    fn set_row_address(&mut self, io: &mut dyn GpioPort, row: usize) {
        if self.last_row == Some(row) {
            return;
        }
        io.write_masked_bits(self.row_lines[row % 4], self.row_mask);
        self.last_row = Some(row);
    }
}

/// Row shift register with a separate latch: A clocks, B carries a one-hot
/// row select and C transfers it to the outputs.
pub struct AbcShiftRegisterRowAddressSetter {
    double_rows: usize,
    clock: GpioBits,
    data: GpioBits,
    latch: GpioBits,
    last_row: Option<usize>,
}

impl AbcShiftRegisterRowAddressSetter {
    pub fn new(double_rows: usize, mapping: &HardwareMapping) -> Self {
        Self {
            double_rows,
            clock: mapping.a,
            data: mapping.b,
            latch: mapping.c,
            last_row: None,
        }
    }
}

impl RowAddressSetter for AbcShiftRegisterRowAddressSetter {
    fn need_bits(&self) -> GpioBits {
        self.clock | self.data | self.latch
    }

    fn set_row_address(&mut self, io: &mut dyn GpioPort, row: usize) {
        if self.last_row == Some(row) {
            return;
        }
        // the last bit shifted in ends up at output 0
        for position in (0..self.double_rows).rev() {
            io.clear_bits(self.clock);
            if position == row {
                io.set_bits(self.data);
            } else {
                io.clear_bits(self.data);
            }
            io.set_bits(self.clock);
        }
        io.clear_bits(self.clock);
        io.set_bits(self.latch);
        io.clear_bits(self.latch);
        self.last_row = Some(row);
    }
}

pub fn row_address_setter(
    kind: RowAddressType,
    double_rows: usize,
    mapping: &HardwareMapping,
) -> Box<dyn RowAddressSetter> {
    match kind {
        RowAddressType::Direct => Box::new(DirectRowAddressSetter::new(double_rows, mapping)),
        RowAddressType::ShiftRegister => {
            Box::new(ShiftRegisterRowAddressSetter::new(double_rows, mapping))
        }
        RowAddressType::DirectRowSelect => Box::new(DirectLineRowAddressSetter::new(mapping)),
        RowAddressType::AbcShiftRegister => {
            Box::new(AbcShiftRegisterRowAddressSetter::new(double_rows, mapping))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEvent;
    use crate::sim::SimTrace;
    use crate::sim::SimulatedGpio;

    fn io(trace: &SimTrace) -> SimulatedGpio {
        let mut io = SimulatedGpio::new().with_trace(trace.clone());
        io.init_outputs(crate::gpio::VALID_BITS);
        io
    }

    #[test]
    fn direct_mask_grows_with_rows() {
        let mapping = HardwareMapping::default();
        assert_eq!(DirectRowAddressSetter::new(4, &mapping).need_bits(), mapping.a | mapping.b);
        assert_eq!(
            DirectRowAddressSetter::new(16, &mapping).need_bits(),
            mapping.a | mapping.b | mapping.c | mapping.d
        );
        assert_eq!(
            DirectRowAddressSetter::new(32, &mapping).need_bits(),
            mapping.a | mapping.b | mapping.c | mapping.d | mapping.e
        );
    }

    #[test]
    fn direct_writes_binary_row_once() {
        let mapping = HardwareMapping::default();
        let trace = SimTrace::new();
        let mut io = io(&trace);
        let mut setter = DirectRowAddressSetter::new(16, &mapping);
        setter.set_row_address(&mut io, 5);
        setter.set_row_address(&mut io, 5);
        assert_eq!(
            trace.events(),
            vec![
                SimEvent::Clear(mapping.b | mapping.d),
                SimEvent::Set(mapping.a | mapping.c),
            ]
        );
    }

    #[test]
    fn shift_register_marks_row_with_low_bit() {
        let mapping = HardwareMapping::default();
        let trace = SimTrace::new();
        let mut io = io(&trace);
        let mut setter = ShiftRegisterRowAddressSetter::new(4, &mapping);
        setter.set_row_address(&mut io, 1);
        let data: Vec<SimEvent> = trace
            .events()
            .into_iter()
            .filter(|event| {
                matches!(event, SimEvent::Set(bits) | SimEvent::Clear(bits) if *bits == mapping.b)
            })
            .collect();
        assert_eq!(
            data,
            vec![
                SimEvent::Set(mapping.b),
                SimEvent::Set(mapping.b),
                SimEvent::Clear(mapping.b),
                SimEvent::Set(mapping.b),
            ]
        );
        assert_eq!(trace.events().last(), Some(&SimEvent::Set(mapping.a)));
    }

    #[test]
    fn direct_line_cycles_every_four_rows() {
        let mapping = HardwareMapping::default();
        let trace = SimTrace::new();
        let mut io = io(&trace);
        let mut setter = DirectLineRowAddressSetter::new(&mapping);
        setter.set_row_address(&mut io, 6);
        assert_eq!(trace.events().last(), Some(&SimEvent::Set(mapping.c)));
    }

    #[test]
    fn abc_latches_after_shifting() {
        let mapping = HardwareMapping::default();
        let trace = SimTrace::new();
        let mut io = io(&trace);
        let mut setter = AbcShiftRegisterRowAddressSetter::new(8, &mapping);
        setter.set_row_address(&mut io, 2);
        let events = trace.events();
        let data_high = events.iter().filter(|e| **e == SimEvent::Set(mapping.b)).count();
        assert_eq!(data_high, 1);
        assert_eq!(
            &events[events.len() - 2..],
            &[SimEvent::Set(mapping.c), SimEvent::Clear(mapping.c)]
        );
    }
}
