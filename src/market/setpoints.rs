use tracing::error;

use super::PassContext;
use crate::domain::{
    apply_limit_if_smaller, covering_index, FrequencyWattPoint, NumberWithSource, ScheduleReqEntry,
    ScheduleSetpointEntry, SetpointType,
};

/// Resample a setpoint schedule onto the pass grid.
pub fn resample_setpoints(ctx: &PassContext, request: &[ScheduleSetpointEntry]) -> Vec<Option<SetpointType>> {
    ctx.timestamps()
        .iter()
        .map(|t| covering_index(request, *t, |e| e.timestamp).and_then(|i| request[i].setpoint.clone()))
        .collect()
}

/// Power for `freq` on a frequency-watt curve sorted by frequency.
///
/// Linear between neighbouring points, extrapolated from the last segment
/// outside the table.
pub fn watt_from_frequency_table(table: &[FrequencyWattPoint], freq: f64) -> f64 {
    match table {
        [] => 0.0,
        [only] => only.total_power_w,
        _ => {
            let upper = table.partition_point(|p| p.frequency_hz <= freq).clamp(1, table.len() - 1);
            let (a, b) = (table[upper - 1], table[upper]);
            let span = b.frequency_hz - a.frequency_hz;
            if span == 0.0 {
                return a.total_power_w;
            }
            a.total_power_w + (freq - a.frequency_hz) * (b.total_power_w - a.total_power_w) / span
        }
    }
}

/// Turn setpoints into limits on the import and export schedules.
///
/// A charging setpoint caps import and closes export; a discharging one caps
/// export with its magnitude and closes import.
pub fn apply_setpoints(
    import: &mut [ScheduleReqEntry],
    export: &mut [ScheduleReqEntry],
    setpoints: &[Option<SetpointType>],
    frequency: Option<f64>,
) {
    if setpoints.len() != import.len() || setpoints.len() != export.len() {
        error!(
            setpoints = setpoints.len(),
            import = import.len(),
            export = export.len(),
            "apply_setpoints: schedules do not have the same size"
        );
        return;
    }

    for ((sp, imp), exp) in setpoints.iter().zip(import.iter_mut()).zip(export.iter_mut()) {
        let Some(sp) = sp else { continue };
        let imp = &mut imp.limits_to_root;
        let exp = &mut exp.limits_to_root;
        let closed = || Some(NumberWithSource::new(0.0, sp.source.clone()));

        if let Some(current) = sp.ac_current_a {
            if current >= 0.0 {
                apply_limit_if_smaller(&mut imp.ac_max_current_a, current, &sp.source);
                exp.ac_max_current_a = closed();
            } else {
                apply_limit_if_smaller(&mut exp.ac_max_current_a, -current, &sp.source);
                imp.ac_max_current_a = closed();
            }
            continue;
        }

        let watt = match (sp.total_power_w, &sp.frequency_table, frequency) {
            (Some(watt), _, _) => watt,
            (None, Some(table), Some(freq)) => watt_from_frequency_table(table, freq),
            _ => continue,
        };
        if watt >= 0.0 {
            apply_limit_if_smaller(&mut imp.total_power_w, watt, &sp.source);
            exp.total_power_w = closed();
        } else {
            apply_limit_if_smaller(&mut exp.total_power_w, -watt, &sp.source);
            imp.total_power_w = closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnergyFlowRequest;
    use chrono::{DateTime, Duration, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn point(frequency_hz: f64, total_power_w: f64) -> FrequencyWattPoint {
        FrequencyWattPoint {
            frequency_hz,
            total_power_w,
        }
    }

    fn setpoint(current: Option<f64>, watt: Option<f64>) -> Option<SetpointType> {
        Some(SetpointType {
            source: "ocpp".to_string(),
            priority: 0,
            ac_current_a: current,
            total_power_w: watt,
            frequency_table: None,
        })
    }

    fn schedules(n: usize) -> (Vec<ScheduleReqEntry>, Vec<ScheduleReqEntry>) {
        let e = ScheduleReqEntry::new(ts("2024-01-01T00:00:00Z"));
        (vec![e.clone(); n], vec![e; n])
    }

    #[test]
    fn test_frequency_table_interpolation() {
        let table = [point(49.0, 10000.0), point(50.0, 0.0), point(51.0, -10000.0)];
        assert_eq!(watt_from_frequency_table(&[], 50.0), 0.0);
        assert_eq!(watt_from_frequency_table(&table[..1], 55.0), 10000.0);
        assert!((watt_from_frequency_table(&table, 49.5) - 5000.0).abs() < 1e-6);
        assert!((watt_from_frequency_table(&table, 50.2) + 2000.0).abs() < 1e-6);
        assert_eq!(watt_from_frequency_table(&table, 50.0), 0.0);
    }

    #[test]
    fn test_charging_current_setpoint_closes_export() {
        let (mut imp, mut exp) = schedules(1);
        apply_setpoints(&mut imp, &mut exp, &[setpoint(Some(10.0), Some(500.0))], None);

        assert_eq!(imp[0].limits_to_root.ac_max_current_a, Some(NumberWithSource::new(10.0, "ocpp")));
        assert_eq!(exp[0].limits_to_root.ac_max_current_a.as_ref().map(|n| n.value), Some(0.0));
        // current takes precedence, power is not touched
        assert!(imp[0].limits_to_root.total_power_w.is_none());
    }

    #[test]
    fn test_discharging_power_setpoint_closes_import() {
        let (mut imp, mut exp) = schedules(1);
        apply_setpoints(&mut imp, &mut exp, &[setpoint(None, Some(-3000.0))], None);

        assert_eq!(exp[0].limits_to_root.total_power_w.as_ref().map(|n| n.value), Some(3000.0));
        assert_eq!(imp[0].limits_to_root.total_power_w.as_ref().map(|n| n.value), Some(0.0));
    }

    #[test]
    fn test_frequency_setpoint_needs_measurement() {
        let (mut imp, mut exp) = schedules(1);
        let sp = Some(SetpointType {
            frequency_table: Some(vec![point(49.0, 4000.0), point(51.0, 0.0)]),
            ..setpoint(None, None).unwrap()
        });

        apply_setpoints(&mut imp, &mut exp, &[sp.clone()], None);
        assert!(imp[0].limits_to_root.total_power_w.is_none());

        apply_setpoints(&mut imp, &mut exp, &[sp], Some(50.0));
        assert_eq!(imp[0].limits_to_root.total_power_w.as_ref().map(|n| n.value), Some(2000.0));
    }

    #[test]
    fn test_size_mismatch_is_skipped() {
        let (mut imp, mut exp) = schedules(2);
        apply_setpoints(&mut imp, &mut exp, &[setpoint(Some(1.0), None)], None);
        assert!(imp.iter().all(|e| e.limits_to_root.ac_max_current_a.is_none()));
    }

    #[test]
    fn test_resample_setpoints_onto_grid() {
        let request = [
            ScheduleSetpointEntry {
                timestamp: ts("2024-01-01T12:30:00Z"),
                setpoint: setpoint(Some(8.0), None),
            },
            ScheduleSetpointEntry {
                timestamp: ts("2024-01-01T12:45:00Z"),
                setpoint: None,
            },
        ];
        let mut root = EnergyFlowRequest::default();
        root.schedule_setpoints = request.to_vec();
        let ctx = PassContext::new(ts("2024-01-01T12:00:00Z"), Duration::minutes(60), Duration::hours(1), &root).unwrap();

        let sp = resample_setpoints(&ctx, &request);
        assert_eq!(sp.len(), 3);
        assert!(sp[0].is_some());
        assert!(sp[1].is_some());
        assert!(sp[2].is_none());
    }
}
