//! Playback of recorded loops: iteration, indexing and slicing agree with
//! each other, in memory and after a round trip through a file store.

use acq_loop::{
    fields, ErrorKind, FileStore, LoopItem, LoopRecorder, LoopView, Selection, Store,
};
use ndarray::{Axis, Slice};
use tempfile::tempdir;

fn taus() -> Vec<f64> {
    vec![0.0, 0.5, 1.0, 1.5]
}

fn freqs() -> Vec<f64> {
    vec![10.0, 20.0, 30.0]
}

fn signal(tau: f64, freq: f64) -> Vec<f64> {
    (0..5).map(|i| tau * freq + i as f64).collect()
}

fn record_two_level(rec: &LoopRecorder) {
    for tau in rec.iterate(taus()).unwrap() {
        rec.append(fields! { "tau" => tau }).unwrap();
        for freq in rec.iterate(freqs()).unwrap() {
            rec.append(fields! { "freq" => freq, "y" => signal(tau, freq) })
                .unwrap();
        }
    }
    rec.append(fields! { "t" => vec![0.0, 0.1, 0.2, 0.3, 0.4] }).unwrap();
}

#[test]
fn test_two_level_playback() {
    let rec = LoopRecorder::new();
    record_two_level(&rec);
    let view = LoopView::from_result(&rec.finalize().unwrap());

    assert_eq!(view.shape(), Some(&[4, 3][..]));
    assert_eq!(view.get("y").unwrap().shape(), &[4, 3, 5]);

    for (i, item) in view.iter().unwrap().enumerate() {
        let child = item.as_view().unwrap();
        assert_eq!(child.shape(), Some(&[3][..]));
        assert_eq!(child.get("tau").unwrap().first(), Some(&taus()[i]));
        assert_eq!(child.get("t").unwrap().len(), 5);

        for (j, leaf) in child.iter().unwrap().enumerate() {
            let record = leaf.as_record().unwrap();
            assert_eq!(record.scalar("freq").unwrap(), freqs()[j]);
            let y: Vec<f64> = record.get("y").unwrap().iter().copied().collect();
            assert_eq!(y, signal(taus()[i], freqs()[j]));
        }
    }
}

#[test]
fn test_iteration_matches_indexing() {
    let rec = LoopRecorder::new();
    record_two_level(&rec);
    let view = rec.view().unwrap();

    let iterated: Vec<LoopItem> = (&view).into_iter().collect();
    assert_eq!(iterated.len(), view.len().unwrap());
    for (i, item) in iterated.iter().enumerate() {
        assert_eq!(item, &view.at(i).unwrap());
    }
}

#[test]
fn test_slice_then_index() {
    let rec = LoopRecorder::new();
    for freq in rec.range(&[0.0, 1.0, 0.125]).unwrap() {
        rec.append(fields! { "freq" => freq, "y" => vec![freq, 2.0 * freq] })
            .unwrap();
    }
    let view = rec.view().unwrap();

    let middle = view.slice(Slice::from(4..7)).unwrap();
    assert_eq!(middle.shape(), Some(&[3][..]));
    let y = middle.get("y").unwrap();
    assert_eq!(
        y.index_axis(Axis(0), 1),
        view.get("y").unwrap().index_axis(Axis(0), 5)
    );

    let tail = view.slice(Slice::new(-2, None, 1)).unwrap();
    let record = tail.at(1).unwrap();
    assert_eq!(record.as_record().unwrap().scalar("freq").unwrap(), 0.875);

    let every_third = view.slice(Slice::new(0, None, 3)).unwrap();
    assert_eq!(every_third.len().unwrap(), 3);
}

#[test]
fn test_index_dispatch() {
    let rec = LoopRecorder::new();
    record_two_level(&rec);
    let view = rec.view().unwrap();

    assert!(matches!(view.index("t").unwrap(), Selection::Field(t) if t.len() == 5));
    assert!(matches!(view.index(2usize).unwrap(), Selection::Item(LoopItem::Loop(_))));
    match view.index(1usize..3).unwrap() {
        Selection::View(sub) => assert_eq!(sub.shape(), Some(&[2, 3][..])),
        other => panic!("expected a sub-view, got {other:?}"),
    }
}

#[test]
fn test_lookup_errors() {
    let rec = LoopRecorder::new();
    record_two_level(&rec);
    let view = rec.view().unwrap();

    assert_eq!(view.get("missing").unwrap_err().kind(), ErrorKind::Lookup);
    assert_eq!(view.at(4).unwrap_err().kind(), ErrorKind::Lookup);
    assert_eq!(
        view.slice(Slice::new(0, None, -1)).unwrap_err().kind(),
        ErrorKind::Argument
    );
}

#[test]
fn test_file_store_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scan.json");

    {
        let store = FileStore::open(&path).unwrap();
        let rec = LoopRecorder::new().with_store("scan", Box::new(store));
        record_two_level(&rec);
        rec.finalize().unwrap();
    }

    let store = FileStore::open(&path).unwrap();
    assert!(store.keys().contains(&"scan".to_string()));
    let view = LoopView::from_store(&store, "scan").unwrap();

    let rec = LoopRecorder::new();
    record_two_level(&rec);
    assert_eq!(view, rec.view().unwrap());
}

#[test]
fn test_view_without_shape() {
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("y".to_string(), ndarray::arr1(&[1.0, 2.0]).into_dyn());
    let view = LoopView::new(fields, None);

    assert_eq!(view.len().unwrap_err().kind(), ErrorKind::State);
    assert_eq!(view.at(0).unwrap_err().kind(), ErrorKind::Shape);
    assert_eq!((&view).into_iter().count(), 0);
    assert_eq!(view.get("y").unwrap().len(), 2);
}
